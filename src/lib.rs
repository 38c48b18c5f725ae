pub mod annotator;
pub mod app;
pub mod command_engine;
pub mod config;
pub mod db;
pub mod design;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gct;
pub mod geneset;
pub mod gmt;
pub mod orthologs;
pub mod output;
pub mod provenance;
pub mod providers;
pub mod registry;
pub mod store;
pub mod table;
