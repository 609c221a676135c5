use assert_matches::assert_matches;

use sra_submit::domain::{Namespace, SourceRecord, SourceUrl};
use sra_submit::error::SubmitError;

#[test]
fn namespace_wire_names() {
    assert_eq!(serde_json::to_string(&Namespace::SixteenS).unwrap(), "\"16s\"");
    assert_eq!(
        serde_json::from_str::<Namespace>("\"wgs\"").unwrap(),
        Namespace::Wgs
    );
    assert_eq!(Namespace::SixteenS.to_string(), "16s");
}

#[test]
fn record_json_with_defaults() {
    let record: SourceRecord = serde_json::from_str(
        r#"{
            "sample": {"id": "s1", "attributes": {"body_site": "stool"}},
            "prepseqs": [{
                "prep": {"id": "p1"},
                "seq": {"id": "q1", "size": 4096, "urls": ["https://dcc.example.org/raw/q1.tar.gz"]}
            }]
        }"#,
    )
    .unwrap();
    assert!(record.is_sequenced());
    assert_eq!(record.sample.attributes["body_site"], "stool");
    let seq = &record.prepseqs[0].seq;
    assert_eq!(seq.instrument_model, None);
    let url: SourceUrl = seq.primary_url().unwrap().parse().unwrap();
    assert_matches!(url, SourceUrl::Http(_));
    assert_eq!(url.file_name(), Some("q1.tar.gz"));
}

#[test]
fn source_url_without_file_name_is_rejected_for_units() {
    let url: SourceUrl = "fasp://aspera.example.org/".parse().unwrap();
    assert_eq!(url.file_name(), None);
    let err = "not a url".parse::<SourceUrl>().unwrap_err();
    assert_matches!(err, SubmitError::InvalidSourceUrl(_));
}
