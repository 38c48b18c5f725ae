use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use crate::error::CatalogError;
use crate::providers::{
    AnnotationProvider, AttributeInfo, AttributeTable, BulkQuery, Filter, ProviderDataset,
    empty_to_none,
};

const DEFAULT_MART: &str = "ENSEMBL_MART_ENSEMBL";

/// BioMart martservice client. Every call is a single blocking request.
#[derive(Clone)]
pub struct BioMartClient {
    client: Client,
    base_url: String,
    mart: String,
}

impl BioMartClient {
    pub fn new(base_url: &str) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .user_agent(format!("exprcat/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| CatalogError::ProviderHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            mart: DEFAULT_MART.to_string(),
        })
    }

    fn get_text(&self, params: &[(&str, &str)]) -> Result<String, CatalogError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(params)
            .send()
            .map_err(|err| CatalogError::ProviderHttp(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "BioMart request failed".to_string());
            return Err(CatalogError::ProviderStatus {
                status: status.as_u16(),
                message,
            });
        }
        let body = response
            .text()
            .map_err(|err| CatalogError::ProviderHttp(err.to_string()))?;
        check_query_error(&body)?;
        Ok(body)
    }

    fn registry_entry(&self, name: &str) -> Result<(String, String), CatalogError> {
        let body = self.get_text(&[("type", "datasets"), ("mart", self.mart.as_str())])?;
        parse_dataset_registry(&body)
            .into_iter()
            .find(|(dataset, _)| dataset == name)
            .ok_or_else(|| CatalogError::not_found("annotation data set", name))
    }
}

impl AnnotationProvider for BioMartClient {
    fn dataset(&self, name: &str) -> Result<ProviderDataset, CatalogError> {
        let (name, display_name) = self.registry_entry(name)?;
        let attributes = parse_attributes(
            &self.get_text(&[("type", "attributes"), ("dataset", name.as_str())])?,
        );
        let filters =
            parse_filters(&self.get_text(&[("type", "filters"), ("dataset", name.as_str())])?);
        debug!(dataset = %name, attributes = attributes.len(), filters = filters.len(), "biomart dataset");
        Ok(ProviderDataset {
            name,
            display_name,
            attributes,
            filters,
        })
    }

    fn bulk_query(&self, dataset: &str, query: &BulkQuery) -> Result<AttributeTable, CatalogError> {
        let xml = query_xml(dataset, query);
        debug!(dataset, attributes = ?query.attributes, "biomart bulk query");
        let body = self.get_text(&[("query", xml.as_str())])?;
        parse_bulk_response(&body, &query.attributes)
    }
}

fn check_query_error(body: &str) -> Result<(), CatalogError> {
    let head = body.trim_start();
    if head.starts_with("Query ERROR") || head.starts_with("ERROR") {
        let line = head.lines().next().unwrap_or_default();
        return Err(CatalogError::ProviderResponse(line.to_string()));
    }
    Ok(())
}

fn parse_dataset_registry(body: &str) -> Vec<(String, String)> {
    body.lines()
        .filter_map(|line| {
            let cells: Vec<&str> = line.split('\t').collect();
            match cells.as_slice() {
                [_, name, display, ..] if !name.trim().is_empty() => {
                    Some((name.trim().to_string(), display.trim().to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

fn parse_attributes(body: &str) -> Vec<AttributeInfo> {
    body.lines()
        .filter_map(|line| {
            let mut cells = line.split('\t');
            let name = cells.next()?.trim();
            if name.is_empty() {
                return None;
            }
            let display_name = cells.next().unwrap_or_default().trim();
            Some(AttributeInfo {
                name: name.to_string(),
                display_name: display_name.to_string(),
            })
        })
        .collect()
}

fn parse_filters(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.split('\t').next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bulk_response(body: &str, attributes: &[String]) -> Result<AttributeTable, CatalogError> {
    let mut table = AttributeTable::new(attributes.to_vec());
    for (number, line) in body.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let cells: Vec<Option<String>> = line.split('\t').map(empty_to_none).collect();
        if cells.len() != attributes.len() {
            return Err(CatalogError::ProviderResponse(format!(
                "line {} has {} cells, expected {}",
                number + 1,
                cells.len(),
                attributes.len()
            )));
        }
        table.push_row(cells)?;
    }
    Ok(table)
}

fn query_xml(dataset: &str, query: &BulkQuery) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><!DOCTYPE Query>\
         <Query virtualSchemaName=\"default\" formatter=\"TSV\" header=\"0\" uniqueRows=\"0\" \
         count=\"\" datasetConfigVersion=\"0.6\">",
    );
    xml.push_str(&format!(
        "<Dataset name=\"{}\" interface=\"default\">",
        escape_xml(dataset)
    ));
    for filter in &query.filters {
        match filter {
            Filter::Equals { name, values } => xml.push_str(&format!(
                "<Filter name=\"{}\" value=\"{}\"/>",
                escape_xml(name),
                escape_xml(&values.join(","))
            )),
            Filter::Present { name } => xml.push_str(&format!(
                "<Filter name=\"{}\" excluded=\"0\"/>",
                escape_xml(name)
            )),
        }
    }
    for attribute in &query.attributes {
        xml.push_str(&format!("<Attribute name=\"{}\"/>", escape_xml(attribute)));
    }
    xml.push_str("</Dataset></Query>");
    xml
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}
