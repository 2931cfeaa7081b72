use assert_matches::assert_matches;
use geoflat::domain::{Accession, StageName};
use geoflat::error::GeoflatError;

#[test]
fn every_geo_prefix_is_accepted() {
    for ok in ["GSE68849", "gsm1", "GPL10558", "GDS4321"] {
        let acc: Accession = ok.parse().unwrap();
        assert_eq!(acc.to_string(), ok.to_uppercase());
    }
}

#[test]
fn invalid_accessions() {
    for bad in ["", "GSE12a", "68849", "GSE-1"] {
        assert_matches!(
            bad.parse::<Accession>(),
            Err(GeoflatError::InvalidAccession(_)),
            "{bad}"
        );
    }
}

#[test]
fn stage_names_serialize_kebab_case() {
    let json = serde_json::to_string(&StageName::ALL).unwrap();
    assert_eq!(
        json,
        r#"["resolve-url","fetch-archive","unpack-archive","assemble-tables"]"#
    );
}
