mod common;

use assert_matches::assert_matches;

use expression_catalog::annotator::FeatureAnnotator;
use expression_catalog::db;
use expression_catalog::domain::{HUMAN_TAXON, TaxonId};
use expression_catalog::error::{CatalogError, ErrorKind};
use expression_catalog::orthologs::{human_index_for, links_for};
use expression_catalog::registry::{self, CanonicalGeneRegistry, stable_id_index};

use common::{HUMAN_DATASET, MOUSE, MOUSE_DATASET, mart};

fn admit(conn: &rusqlite::Connection, dataset: &str, taxon: TaxonId) -> Result<registry::SpeciesAdmission, CatalogError> {
    let mart = mart();
    CanonicalGeneRegistry::new(&mart, 3).admit_species(conn, dataset, taxon)
}

#[test]
fn human_genes_link_to_themselves() {
    let conn = db::open_in_memory().unwrap();
    let admission = admit(&conn, HUMAN_DATASET, HUMAN_TAXON).unwrap();
    assert_eq!(admission.gene_count, 4);
    assert_eq!(admission.ortholog_count, 4);
    assert_eq!(admission.first_gene_index, Some(1));
    assert_eq!(admission.annotation_version, "hsapiens_gene_ensembl GRCh38.p14");

    for link in links_for(&conn, HUMAN_TAXON).unwrap() {
        assert_eq!(link.gene_index, link.human_gene_index);
    }
}

#[test]
fn non_human_species_requires_human_hub() {
    let conn = db::open_in_memory().unwrap();
    let err = admit(&conn, MOUSE_DATASET, MOUSE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(registry::list_species(&conn).unwrap().is_empty());
}

#[test]
fn orthologs_keep_the_first_human_homolog() {
    let conn = db::open_in_memory().unwrap();
    admit(&conn, HUMAN_DATASET, HUMAN_TAXON).unwrap();
    let admission = admit(&conn, MOUSE_DATASET, MOUSE).unwrap();
    assert_eq!(admission.gene_count, 4);
    assert_eq!(admission.ortholog_count, 2);

    let human = stable_id_index(&conn, HUMAN_TAXON).unwrap();
    let mouse = stable_id_index(&conn, MOUSE).unwrap();
    assert_eq!(
        human_index_for(&conn, mouse["ENSMUSG1"]).unwrap(),
        Some(human["ENSG1"])
    );
    assert_eq!(
        human_index_for(&conn, mouse["ENSMUSG2"]).unwrap(),
        Some(human["ENSG2"])
    );
    assert_eq!(human_index_for(&conn, mouse["ENSMUSG3"]).unwrap(), None);

    let human_indices: Vec<i64> = links_for(&conn, MOUSE)
        .unwrap()
        .into_iter()
        .map(|link| link.human_gene_index)
        .collect();
    for index in human_indices {
        assert_eq!(human_index_for(&conn, index).unwrap(), Some(index));
    }
}

#[test]
fn admitting_twice_is_rejected_without_new_genes() {
    let conn = db::open_in_memory().unwrap();
    admit(&conn, HUMAN_DATASET, HUMAN_TAXON).unwrap();

    let err = admit(&conn, HUMAN_DATASET, HUMAN_TAXON).unwrap_err();
    assert_matches!(err, CatalogError::AlreadyExists { entity: "species", .. });
    let genes: i64 = conn
        .query_row("SELECT COUNT(*) FROM gene", [], |row| row.get(0))
        .unwrap();
    assert_eq!(genes, 4);
}

#[test]
fn gene_indices_are_not_reused_after_removal() {
    let conn = db::open_in_memory().unwrap();
    admit(&conn, HUMAN_DATASET, HUMAN_TAXON).unwrap();
    let first = admit(&conn, MOUSE_DATASET, MOUSE).unwrap();
    assert_eq!(first.first_gene_index, Some(5));

    registry::remove_species(&conn, MOUSE).unwrap();
    assert!(links_for(&conn, MOUSE).unwrap().is_empty());

    let again = admit(&conn, MOUSE_DATASET, MOUSE).unwrap();
    assert_eq!(again.first_gene_index, Some(9));
}

#[test]
fn human_species_cannot_be_removed() {
    let conn = db::open_in_memory().unwrap();
    admit(&conn, HUMAN_DATASET, HUMAN_TAXON).unwrap();
    admit(&conn, MOUSE_DATASET, MOUSE).unwrap();

    let err = registry::remove_species(&conn, HUMAN_TAXON).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(registry::list_species(&conn).unwrap().len(), 2);
}

#[test]
fn unknown_provider_dataset_is_not_found() {
    let conn = db::open_in_memory().unwrap();
    admit(&conn, HUMAN_DATASET, HUMAN_TAXON).unwrap();
    let err = admit(&conn, "drerio_gene_ensembl", TaxonId(7955)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn ambiguous_probe_keeps_first_mapping() {
    let conn = db::open_in_memory().unwrap();
    admit(&conn, HUMAN_DATASET, HUMAN_TAXON).unwrap();
    admit(&conn, MOUSE_DATASET, MOUSE).unwrap();
    let mouse = stable_id_index(&conn, MOUSE).unwrap();

    let provider = mart();
    let features = vec!["1431_at".to_string(), "missing_at".to_string()];
    let annotation = FeatureAnnotator::new(&provider)
        .annotate(&conn, &features, MOUSE, "affy_probe")
        .unwrap();
    assert_eq!(annotation.matched, 1);
    assert_eq!(annotation.features[0].origin_gene_index, Some(mouse["ENSMUSG1"]));
    assert_eq!(annotation.features[1].origin_gene_index, None);
    assert!((annotation.match_rate() - 0.5).abs() < 1e-9);
}

#[test]
fn human_features_annotate_by_stable_id() {
    let conn = db::open_in_memory().unwrap();
    admit(&conn, HUMAN_DATASET, HUMAN_TAXON).unwrap();

    let provider = mart();
    let features = vec!["ENSG4".to_string(), "ENSG1".to_string()];
    let annotation = FeatureAnnotator::new(&provider)
        .annotate(&conn, &features, HUMAN_TAXON, "ensembl_gene_id")
        .unwrap();
    assert_eq!(annotation.canonical, 2);
    assert_eq!(annotation.features[0].gene_index, Some(4));
    assert_eq!(annotation.features[0].origin_gene_index, Some(4));
    assert_eq!(annotation.features[1].gene_index, Some(1));
}

#[test]
fn annotation_rejects_duplicate_features_and_unknown_symbol_types() {
    let conn = db::open_in_memory().unwrap();
    admit(&conn, HUMAN_DATASET, HUMAN_TAXON).unwrap();
    let provider = mart();
    let annotator = FeatureAnnotator::new(&provider);

    let duplicated = vec!["ENSG1".to_string(), "ENSG1".to_string()];
    let err = annotator
        .annotate(&conn, &duplicated, HUMAN_TAXON, "ensembl_gene_id")
        .unwrap_err();
    assert_matches!(err, CatalogError::Validation(_));

    let features = vec!["ENSG1".to_string()];
    let err = annotator
        .annotate(&conn, &features, HUMAN_TAXON, "refseq_mrna")
        .unwrap_err();
    assert_matches!(err, CatalogError::Validation(_));
}
