mod common;

use assert_matches::assert_matches;

use expression_catalog::app::{ContrastPath, DesignInput};
use expression_catalog::design::SampleGroups;
use expression_catalog::domain::{HUMAN_TAXON, TaxonId};
use expression_catalog::error::{CatalogError, ErrorKind};
use expression_catalog::output::JsonOutput;

use common::{
    ANALYSIS, DESIGN_TSV, DS1_GCT, DgeMode, Hook, HookedMart, MOUSE, MockDge, Workspace,
    admit_human_and_mouse, analysis_ready, count, create_ds1, ds1_input, mart, shared_app_at,
    table,
};

const HALLMARK_GMT: &str = "P53_PATHWAY\tp53 targets\tTP53\tMALAT1\tTP53\tNOTAGENE\n\
EGFR_SIGNALING\tegfr\tEGFR\tBRCA1\n";

fn design_input(content: &str) -> DesignInput {
    DesignInput {
        table: table(content),
        sample_groups: SampleGroups::FromDesign,
        levels: None,
        description: None,
    }
}

#[test]
fn create_dataset_annotates_features_through_the_hub() {
    let workspace = Workspace::new();
    let app = workspace.app();
    admit_human_and_mouse(&app);

    let created = create_ds1(&app, &workspace);
    assert_eq!(created.data_set.name, "ds1");
    assert_eq!(created.data_set.feature_count, 3);
    assert_eq!(created.data_set.sample_count, 3);
    assert_eq!(created.data_set.gene_annotation_version, "mmusculus_gene_ensembl GRCm39");
    assert_eq!(created.matched_features, 3);
    assert_eq!(created.canonical_features, 2);
    assert!((created.match_rate - 1.0).abs() < 1e-9);
    assert!(created.data_set.exprs_wc.is_file());
    assert!(created.data_set.exprs_wc.starts_with(workspace.catalog_root()));

    let features = app.get_features("ds1").unwrap();
    let names: Vec<&str> = features.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["1427_at", "1430_at", "1429_at"]);
    assert_eq!(
        features.iter().map(|f| f.feature_index).collect::<Vec<_>>(),
        [0, 1, 2]
    );

    assert_eq!(features[0].gene_index, Some(1));
    assert_eq!(features[0].origin_gene_index, Some(5));
    assert_eq!(features[0].origin_taxon_id, Some(MOUSE));
    assert_eq!(features[0].gene_symbol.as_deref(), Some("TP53"));
    assert_eq!(features[0].description.as_deref(), Some("Trp53 probe"));

    assert_eq!(features[1].gene_index, Some(2));
    assert_eq!(features[1].origin_gene_index, Some(6));
    assert_eq!(features[1].description, None);

    assert_eq!(features[2].gene_index, None);
    assert_eq!(features[2].origin_gene_index, Some(7));
    assert_eq!(features[2].gene_symbol, None);
}

#[test]
fn duplicate_dataset_name_conflicts_without_side_effects() {
    let workspace = Workspace::new();
    let app = workspace.app();
    admit_human_and_mouse(&app);
    create_ds1(&app, &workspace);
    let mappings = count(&app, "feature_mapping");

    let exprs = workspace.write("again.gct", common::DS1_GCT);
    let err = app.create_dataset(ds1_input(&exprs), &JsonOutput).unwrap_err();
    assert_matches!(err, CatalogError::AlreadyExists { entity: "data set", .. });
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(count(&app, "feature_mapping"), mappings);
    assert_eq!(count(&app, "data_set"), 1);
}

#[test]
fn dataset_name_defaults_to_file_stem() {
    let workspace = Workspace::new();
    let app = workspace.app();
    admit_human_and_mouse(&app);
    let exprs = workspace.write("GSE1234.gct", common::DS1_GCT);
    let mut input = ds1_input(&exprs);
    input.name = None;

    let created = app.create_dataset(input, &JsonOutput).unwrap();
    assert_eq!(created.data_set.name, "GSE1234");
}

#[test]
fn dataset_for_unadmitted_species_is_not_found() {
    let workspace = Workspace::new();
    let app = workspace.app();
    app.admit_species(None, HUMAN_TAXON, &JsonOutput).unwrap();
    let exprs = workspace.write("ds1.gct", common::DS1_GCT);

    let err = app.create_dataset(ds1_input(&exprs), &JsonOutput).unwrap_err();
    assert_matches!(err, CatalogError::UnknownTaxon(10090));
    assert!(app.list_datasets().unwrap().is_empty());
}

#[test]
fn unmatched_features_reject_the_dataset_and_discard_files() {
    let workspace = Workspace::new();
    let app = workspace.app();
    admit_human_and_mouse(&app);
    let exprs = workspace.write(
        "nomatch.gct",
        "#1.2\n2\t2\nName\tDescription\ta\tb\nX1\tNA\t1\t2\nX2\tNA\t3\t4\n",
    );
    let mut input = ds1_input(&exprs);
    input.name = Some("nomatch".parse().unwrap());

    let err = app.create_dataset(input, &JsonOutput).unwrap_err();
    assert_matches!(err, CatalogError::Validation(_));
    assert_eq!(count(&app, "data_set"), 0);
    assert!(!app.store().dataset_dir(&"nomatch".parse().unwrap()).exists());
}

#[test]
fn empty_matrix_is_rejected() {
    let workspace = Workspace::new();
    let app = workspace.app();
    admit_human_and_mouse(&app);
    let exprs = workspace.write("empty.gct", "#1.2\n0\t2\nName\tDescription\ta\tb\n");
    let mut input = ds1_input(&exprs);
    input.name = Some("empty".parse().unwrap());

    let err = app.create_dataset(input, &JsonOutput).unwrap_err();
    assert_matches!(err, CatalogError::Validation(_));
    assert_eq!(count(&app, "data_set"), 0);
}

#[test]
fn losing_dataset_writer_leaves_the_winners_files() {
    let workspace = Workspace::new();
    let hook = Hook::default();
    let app = workspace.shared_app(
        HookedMart {
            inner: mart(),
            hook: hook.clone(),
        },
        MockDge::default(),
    );
    admit_human_and_mouse(&app);

    let winner_exprs = workspace.write("winner.gct", DS1_GCT);
    let loser_exprs = workspace.write("loser.gct", &DS1_GCT.replace("Trp53 probe", "second copy"));
    let root = workspace.root.clone();
    let winner_input = ds1_input(&winner_exprs);
    *hook.lock().unwrap() = Some(Box::new(move || {
        let winner = shared_app_at(&root, mart(), MockDge::default());
        winner.create_dataset(winner_input, &JsonOutput).unwrap();
    }));

    let err = app.create_dataset(ds1_input(&loser_exprs), &JsonOutput).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let data_sets = app.list_datasets().unwrap();
    assert_eq!(data_sets.len(), 1);
    assert_eq!(data_sets[0].exprs_src, winner_exprs.as_str());
    assert_eq!(std::fs::read_to_string(&data_sets[0].exprs_wc).unwrap(), DS1_GCT);
    assert!(data_sets[0].pheno_wc.is_file());
    assert_eq!(count(&app, "feature_mapping"), 3);

    let json = serde_json::to_value(&data_sets[0]).unwrap();
    assert_eq!(json["exprs_wc"], data_sets[0].exprs_wc.as_str());
}

#[test]
fn phenotype_rows_follow_matrix_samples() {
    let workspace = Workspace::new();
    let app = workspace.app();
    admit_human_and_mouse(&app);
    let exprs = workspace.write("ds1.gct", common::DS1_GCT);
    let pheno = workspace.write("pheno.tsv", "sample\tgroup\ns3\tB\ns1\tA\ns2\tB\n");
    let mut input = ds1_input(&exprs);
    input.pheno = Some(pheno);
    let created = app.create_dataset(input, &JsonOutput).unwrap();

    let stored = std::fs::read_to_string(&created.data_set.pheno_wc).unwrap();
    assert_eq!(
        stored,
        "Sample\t_DatasetSampleIndex\tgroup\ns1\t0\tA\ns2\t1\tB\ns3\t2\tB\n"
    );

    let design = app
        .create_design(
            "ds1",
            &"by_group".parse().unwrap(),
            DesignInput {
                table: table(DESIGN_TSV),
                sample_groups: SampleGroups::PhenoColumn("group".to_string()),
                levels: Some(vec!["A".to_string(), "B".to_string()]),
                description: None,
            },
        )
        .unwrap();
    assert_eq!(design.sample_groups, ["A", "B", "B"]);
    assert_eq!(design.sample_group_levels, ["A", "B"]);
}

#[test]
fn design_defaults_groups_and_reorders_labelled_rows() {
    let workspace = Workspace::new();
    let app = workspace.app();
    admit_human_and_mouse(&app);
    create_ds1(&app, &workspace);

    let design = app
        .create_design(
            "ds1",
            &"d1".parse().unwrap(),
            design_input("Sample\tIntercept\tTreated\ns3\t1\t1\ns1\t1\t0\ns2\t1\t1\n"),
        )
        .unwrap();
    assert_eq!(design.variable_count, 2);
    assert_eq!(
        design.design_matrix.column("Treated").unwrap().values,
        vec![0, 1, 1]
    );
    assert_eq!(
        design.sample_groups,
        ["Intercept.1_Treated.0", "Intercept.1_Treated.1", "Intercept.1_Treated.1"]
    );
    assert_eq!(
        design.sample_group_levels,
        ["Intercept.1_Treated.0", "Intercept.1_Treated.1"]
    );
}

#[test]
fn design_missing_a_sample_is_rejected() {
    let workspace = Workspace::new();
    let app = workspace.app();
    admit_human_and_mouse(&app);
    create_ds1(&app, &workspace);

    let err = app
        .create_design(
            "ds1",
            &"d1".parse().unwrap(),
            design_input("Sample\tIntercept\tTreated\ns1\t1\t0\ns2\t1\t1\n"),
        )
        .unwrap_err();
    assert_matches!(err, CatalogError::Validation(_));
    assert!(app.list_designs("ds1").unwrap().is_empty());
}

#[test]
fn non_integer_design_cell_leaves_no_design() {
    let workspace = Workspace::new();
    let app = workspace.app();
    admit_human_and_mouse(&app);
    create_ds1(&app, &workspace);

    let err = app
        .create_design(
            "ds1",
            &"d1".parse().unwrap(),
            design_input("Sample\tIntercept\tTreated\ns1\t1\t0\ns2\t1\t0.5\ns3\t1\t1\n"),
        )
        .unwrap_err();
    assert_matches!(err, CatalogError::Validation(_));
    assert_eq!(count(&app, "design"), 0);
}

#[test]
fn contrast_rows_must_name_design_columns() {
    let workspace = Workspace::new();
    let app = workspace.app();
    analysis_ready(&app, &workspace);

    let err = app
        .create_contrast(
            "ds1",
            "d1",
            &"bad".parse().unwrap(),
            &table("Coefficient\tX\nIntercept\t0\nDose\t1\n"),
            None,
        )
        .unwrap_err();
    assert_matches!(err, CatalogError::Validation(_));

    let contrasts = app.list_contrasts("ds1", "d1").unwrap();
    assert_eq!(contrasts.len(), 1);
    assert_eq!(contrasts[0].columns[0].name, "TreatedVsCtrl");
    assert_eq!(contrasts[0].columns[0].values, vec![0.0, 1.0]);
}

#[test]
fn run_analysis_stores_model_rows_and_feature_subset() {
    let workspace = Workspace::new();
    let app = workspace.app();
    analysis_ready(&app, &workspace);

    let analysis = app.run_analysis(ANALYSIS, "limma", &JsonOutput).unwrap();
    assert_eq!(analysis.result_rows, 3);
    assert_eq!(analysis.used_features, 2);
    assert_eq!(analysis.model.method_description, "mock limma fit");
    assert!(analysis.model.input_obj_file.is_file());
    assert!(analysis.model.fit_obj_file.is_file());
    assert_eq!(analysis.model.fit_obj_file.file_name(), Some("fit_obj.rds"));

    let results = app.get_results(ANALYSIS, "limma").unwrap();
    assert_eq!(results.rows.len(), 3);
    assert!(results.rows.iter().all(|row| row.contrast_column == "TreatedVsCtrl"));
    assert_eq!(results.rows[0].feature_name, "1427_at");
    assert_eq!(results.rows[0].gene_index, Some(1));
    assert_eq!(count(&app, "feature_subset"), 3);
    assert_eq!(results.used_features, vec![true, true, false]);

    let models = app.list_models().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].data_set, "ds1");
    assert_eq!(models[0].dge_method, "limma");
}

#[test]
fn existing_model_is_not_overwritten() {
    let workspace = Workspace::new();
    let app = workspace.app();
    analysis_ready(&app, &workspace);
    app.run_analysis(ANALYSIS, "limma", &JsonOutput).unwrap();

    let err = app.run_analysis(ANALYSIS, "limma", &JsonOutput).unwrap_err();
    assert_matches!(err, CatalogError::AlreadyExists { entity: "model", .. });
    assert_eq!(count(&app, "dge_model"), 1);
    assert_eq!(count(&app, "dge_table"), 3);
}

#[test]
fn losing_analysis_writer_leaves_the_winners_model() {
    let workspace = Workspace::new();
    let engine = MockDge::default();
    let hook = engine.before_fit.clone();
    let app = workspace.shared_app(mart(), engine);
    analysis_ready(&app, &workspace);

    let root = workspace.root.clone();
    *hook.lock().unwrap() = Some(Box::new(move || {
        let winner = shared_app_at(&root, mart(), MockDge::default());
        winner.run_analysis(ANALYSIS, "limma", &JsonOutput).unwrap();
    }));

    let err = app.run_analysis(ANALYSIS, "limma", &JsonOutput).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let results = app.get_results(ANALYSIS, "limma").unwrap();
    assert!(results.model.input_obj_file.is_file());
    assert!(results.model.fit_obj_file.is_file());
    assert_eq!(results.rows.len(), 3);
    assert_eq!(count(&app, "dge_model"), 1);
}

#[test]
fn engine_failure_persists_nothing() {
    let workspace = Workspace::new();
    let app = workspace.app_with(MockDge {
        mode: DgeMode::Fail,
        ..MockDge::default()
    });
    analysis_ready(&app, &workspace);

    let err = app.run_analysis(ANALYSIS, "limma", &JsonOutput).unwrap_err();
    assert_matches!(err, CatalogError::Engine(_));
    assert_eq!(err.kind(), ErrorKind::External);
    assert_eq!(count(&app, "dge_model"), 0);
    assert!(app.get_results(ANALYSIS, "limma").is_err());
}

#[test]
fn malformed_engine_response_is_rejected() {
    let workspace = Workspace::new();
    let app = workspace.app_with(MockDge {
        mode: DgeMode::ShortMask,
        ..MockDge::default()
    });
    analysis_ready(&app, &workspace);

    let err = app.run_analysis(ANALYSIS, "limma", &JsonOutput).unwrap_err();
    assert_matches!(err, CatalogError::EngineResponse(_));
    assert_eq!(count(&app, "dge_model"), 0);
    assert_eq!(count(&app, "feature_subset"), 0);
}

#[test]
fn method_in_use_cannot_be_removed() {
    let workspace = Workspace::new();
    let app = workspace.app();
    analysis_ready(&app, &workspace);
    app.run_analysis(ANALYSIS, "limma", &JsonOutput).unwrap();

    let err = app.remove_method("limma").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);

    app.remove_model(ANALYSIS, "limma").unwrap();
    app.remove_method("limma").unwrap();
    assert!(app.list_methods().unwrap().is_empty());
}

#[test]
fn removing_a_dataset_cascades_to_every_dependent() {
    let workspace = Workspace::new();
    let app = workspace.app();
    analysis_ready(&app, &workspace);
    let analysis = app.run_analysis(ANALYSIS, "limma", &JsonOutput).unwrap();
    let gmt = workspace.write("hallmark.gmt", HALLMARK_GMT);
    app.add_gmt(&"hallmark".parse().unwrap(), &gmt, HUMAN_TAXON, None, &JsonOutput)
        .unwrap();
    app.add_gse_method("limma", &"camera".parse().unwrap(), None, None)
        .unwrap();
    let run = app.run_gse(ANALYSIS, "limma", "camera", None, &JsonOutput).unwrap();
    let model_dir = analysis.model.fit_obj_file.parent().unwrap().to_path_buf();
    let gse_dir = run.result.output_file.parent().unwrap().to_path_buf();
    assert!(model_dir.is_dir());
    assert!(gse_dir.is_dir());

    app.remove_dataset("ds1").unwrap();

    for table in [
        "data_set",
        "data_set_sample",
        "feature_mapping",
        "design",
        "contrast",
        "contrast_column",
        "dge_model",
        "feature_subset",
        "dge_table",
        "gse_result",
        "gse_table",
    ] {
        assert_eq!(count(&app, table), 0, "{table} still has rows");
    }
    assert!(!model_dir.exists());
    assert!(!gse_dir.exists());
    assert!(!app.store().dataset_dir(&"ds1".parse().unwrap()).exists());
    assert_eq!(count(&app, "dge_method"), 1);
    assert_eq!(count(&app, "gene_set"), 2);
}

#[test]
fn removing_a_contrast_drops_its_models() {
    let workspace = Workspace::new();
    let app = workspace.app();
    analysis_ready(&app, &workspace);
    app.run_analysis(ANALYSIS, "limma", &JsonOutput).unwrap();

    app.remove_contrast(ANALYSIS).unwrap();
    assert_eq!(count(&app, "dge_model"), 0);
    assert_eq!(count(&app, "dge_table"), 0);
    assert_eq!(app.list_designs("ds1").unwrap().len(), 1);
}

#[test]
fn species_in_use_cannot_be_removed() {
    let workspace = Workspace::new();
    let app = workspace.app();
    admit_human_and_mouse(&app);
    create_ds1(&app, &workspace);

    let err = app.remove_species(MOUSE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    app.remove_dataset("ds1").unwrap();
    app.remove_species(MOUSE).unwrap();
    assert_eq!(app.list_species().unwrap().len(), 1);
}

#[test]
fn non_human_species_requires_a_dataset_name() {
    let workspace = Workspace::new();
    let app = workspace.app();
    app.admit_species(None, HUMAN_TAXON, &JsonOutput).unwrap();

    let err = app.admit_species(None, TaxonId(10090), &JsonOutput).unwrap_err();
    assert_matches!(err, CatalogError::Validation(_));
}

#[test]
fn gmt_import_counts_unmatched_symbols() {
    let workspace = Workspace::new();
    let app = workspace.app();
    admit_human_and_mouse(&app);
    let gmt = workspace.write("hallmark.gmt", HALLMARK_GMT);

    let import = app
        .add_gmt(&"hallmark".parse().unwrap(), &gmt, HUMAN_TAXON, Some("MSigDB hallmarks"), &JsonOutput)
        .unwrap();
    assert_eq!(import.gene_sets, 2);
    assert_eq!(import.memberships, 4);
    assert_eq!(import.total_symbols, 6);
    assert_eq!(import.unmatched_symbols, 1);
    assert!((import.unmatched_fraction - 1.0 / 6.0).abs() < 1e-9);

    let categories = app.list_gmt().unwrap();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0].gene_set_count, 2);
    assert!(categories[0].file_wc.is_file());

    // TP53 appears twice in P53_PATHWAY and is stored once.
    assert_eq!(app.gene_set_members("hallmark", "P53_PATHWAY").unwrap(), vec![1, 3]);
    let err = app.gene_set_members("hallmark", "KRAS_SIGNALING").unwrap_err();
    assert_matches!(err, CatalogError::NotFound { entity: "gene set", .. });

    let err = app
        .add_gmt(&"hallmark".parse().unwrap(), &gmt, HUMAN_TAXON, None, &JsonOutput)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(categories[0].file_wc.is_file());

    let file = categories[0].file_wc.clone();
    app.remove_gmt("hallmark").unwrap();
    assert!(!file.exists());
    assert_eq!(count(&app, "gene_set"), 0);
    assert_eq!(count(&app, "gene_set_gene"), 0);
}

#[test]
fn run_gse_skips_rows_for_unknown_gene_sets() {
    let workspace = Workspace::new();
    let app = workspace.app();
    analysis_ready(&app, &workspace);
    app.add_gse_method("limma", &"camera".parse().unwrap(), None, None)
        .unwrap();

    let err = app
        .run_gse(ANALYSIS, "limma", "camera", None, &JsonOutput)
        .unwrap_err();
    assert_matches!(err, CatalogError::NotFound { entity: "model", .. });

    app.run_analysis(ANALYSIS, "limma", &JsonOutput).unwrap();
    let err = app
        .run_gse(ANALYSIS, "limma", "camera", None, &JsonOutput)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);

    let gmt = workspace.write("hallmark.gmt", HALLMARK_GMT);
    app.add_gmt(&"hallmark".parse().unwrap(), &gmt, HUMAN_TAXON, None, &JsonOutput)
        .unwrap();
    let categories = vec!["hallmark".to_string()];
    let run = app
        .run_gse(ANALYSIS, "limma", "camera", Some(&categories), &JsonOutput)
        .unwrap();
    assert_eq!(run.rows, 1);
    assert_eq!(run.skipped_rows, 1);
    assert!(run.result.output_file.is_file());

    let table = app.get_gse_results(ANALYSIS, "limma", "camera").unwrap();
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0].gene_set, "P53_PATHWAY");
    assert_eq!(table.rows[0].direction, 1);
    assert!((table.rows[0].enrichment_score - 3.0).abs() < 1e-9);

    let err = app
        .run_gse(ANALYSIS, "limma", "camera", None, &JsonOutput)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = app.remove_gse_method("limma", "camera").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);

    let output = run.result.output_file.clone();
    app.remove_gse(ANALYSIS, "limma", "camera").unwrap();
    assert!(!output.exists());
    assert_eq!(count(&app, "gse_table"), 0);
    app.remove_gse_method("limma", "camera").unwrap();
}

#[test]
fn unknown_contrast_path_is_not_found() {
    let workspace = Workspace::new();
    let app = workspace.app();
    analysis_ready(&app, &workspace);

    let path = ContrastPath {
        contrast: "missing",
        ..ANALYSIS
    };
    let err = app.run_analysis(path, "limma", &JsonOutput).unwrap_err();
    assert_matches!(err, CatalogError::NotFound { entity: "contrast", .. });
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
