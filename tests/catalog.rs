use std::fs;

use kira_data_registrar::catalog::parse_response;
use kira_data_registrar::domain::FormatType;

#[test]
fn parse_resource_map_fixture() {
    let body = fs::read_to_string("tests/fixtures/dataone_resource_map.json").unwrap();
    let rows = parse_response(&body).unwrap();
    assert_eq!(rows.len(), 4);

    let metadata = &rows[0];
    assert_eq!(metadata.format_type, FormatType::Metadata);
    assert_eq!(metadata.size_bytes, Some(21702));
    assert_eq!(metadata.documents.len(), 4);
    assert!(metadata.file_name.is_none());

    let importable = rows
        .iter()
        .filter_map(|row| row.importable_name())
        .collect::<Vec<_>>();
    assert_eq!(
        importable,
        vec![
            "2015 Barrow Atqasuk ITEX Thaw v1.csv",
            "1995-20XX Barrow Atqasuk ITEX Thaw metadata - Copy.txt",
            "2016 Barrow Atqasuk ITEX Thaw v1.csv",
        ]
    );
}

#[test]
fn parse_identifier_fixture() {
    let body = fs::read_to_string("tests/fixtures/dataone_identifier.json").unwrap();
    let rows = parse_response(&body).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].resource_map_ids,
        vec!["resource_map_urn:uuid:c878ae53-06cf-40c9-a830-7f6f564133f9".to_string()]
    );
    assert_eq!(
        rows[0].format_id.as_deref(),
        Some("eml://ecoinformatics.org/eml-2.1.1")
    );
}
