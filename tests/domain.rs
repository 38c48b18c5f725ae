use assert_matches::assert_matches;

use expression_catalog::domain::{
    DataSetKind, EntityName, HUMAN_TAXON, HomologAttributes, MicroArrayNormalization,
    RnaSeqNormalization, TaxonId,
};
use expression_catalog::error::{CatalogError, ErrorKind};

#[test]
fn parse_taxon_id() {
    let taxon: TaxonId = " 9606 ".parse().unwrap();
    assert_eq!(taxon, HUMAN_TAXON);
    assert!(taxon.is_human());
    assert!(!TaxonId(10090).is_human());

    let err = "0".parse::<TaxonId>().unwrap_err();
    assert_matches!(err, CatalogError::Validation(_));
    assert!("mouse".parse::<TaxonId>().is_err());
}

#[test]
fn parse_entity_name() {
    let name: EntityName = "  GSE1234 ".parse().unwrap();
    assert_eq!(name.as_str(), "GSE1234");

    for bad in ["", "   ", "a/b", "a\\b", "tab\there"] {
        let err = bad.parse::<EntityName>().unwrap_err();
        assert_matches!(err, CatalogError::InvalidName(_));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}

#[test]
fn parse_dataset_kind() {
    assert_eq!(
        "microarray".parse::<DataSetKind>().unwrap(),
        DataSetKind::MicroArray(MicroArrayNormalization::Rma)
    );
    assert_eq!(
        "RNASeq:rpkm".parse::<DataSetKind>().unwrap(),
        DataSetKind::RnaSeq(RnaSeqNormalization::Rpkm)
    );
    assert_eq!(
        DataSetKind::MicroArray(MicroArrayNormalization::Mas5).to_string(),
        "microarray:mas5"
    );
    assert!("rnaseq:mas5".parse::<DataSetKind>().is_err());
}

#[test]
fn dataset_kind_serializes_tagged() {
    let kind = DataSetKind::RnaSeq(RnaSeqNormalization::Counts);
    let json = serde_json::to_string(&kind).unwrap();
    assert_eq!(json, r#"{"kind":"rnaseq","normalization":"counts"}"#);
}

#[test]
fn homolog_attributes_follow_dataset_prefix() {
    let names = HomologAttributes::for_dataset("mmusculus_gene_ensembl");
    assert_eq!(names.attribute, "mmusculus_homolog_ensembl_gene");
    assert_eq!(names.filter, "with_mmusculus_homolog");
}
