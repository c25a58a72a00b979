use crate::error::status_error;
use crate::net::HttpClient;
use crate::prelude::*;
use crate::repo::{self, resolve_token, validate_repo_id};

#[derive(Debug, Clone, Default)]
pub struct InfoOptions {
    pub auth_token: Option<String>,
    pub endpoint: Option<Url>,
}

impl InfoOptions {
    fn endpoint_url(&self) -> Result<Url> {
        match &self.endpoint {
            Some(url) => Ok(url.clone()),
            None => repo::default_endpoint(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SplitInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_examples: Option<u64>,
}

/// One configuration's worth of dataset metadata, as published on the hub's
/// dataset card. Every field is optional: cards are free-form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DatasetInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<Feature>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub splits: Vec<SplitInfo>,
}

impl DatasetInfo {
    pub fn from_value(value: Value) -> Result<DatasetInfo> {
        serde_json::from_value(value)
            .map_err(|err| HubError::BadConfig(format!("malformed dataset_info: {}", err)).into())
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).context("failed to serialize dataset info")
    }
}

/// Fetch the raw dataset-info document for `repo_id`.
pub fn get_dataset_info(repo_id: &str, options: &InfoOptions) -> Result<Value> {
    validate_repo_id(repo_id)?;
    let url = repo::hub_url(
        &options.endpoint_url()?,
        &format!("api/datasets/{}", repo_id),
    )?;
    let mut headers = Vec::new();
    if let Some(token) = resolve_token(options.auth_token.as_deref()) {
        headers.push(("Authorization", format!("Bearer {}", token)));
    }
    let http = HttpClient::new();
    let response = http.request("GET", &url, &headers)?;
    if response.status() >= 300 {
        return Err(status_error(&url, &response).into());
    }
    response
        .into_json()
        .map_err(|err| HubError::BadConfig(format!("malformed dataset info from {}: {}", url, err)).into())
}

/// The parsed `cardData.dataset_info` entries. The hub serves either a single
/// object or an array of them; both come back as a vector here.
pub fn get_dataset_infos(repo_id: &str, options: &InfoOptions) -> Result<Vec<DatasetInfo>> {
    let raw = get_dataset_info(repo_id, options)?;
    parse_dataset_infos(&raw)
}

pub(crate) fn parse_dataset_infos(raw: &Value) -> Result<Vec<DatasetInfo>> {
    match raw.pointer("/cardData/dataset_info") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .cloned()
            .map(DatasetInfo::from_value)
            .collect(),
        Some(single @ Value::Object(_)) => Ok(vec![DatasetInfo::from_value(single.clone())?]),
        Some(other) => Err(HubError::BadConfig(format!(
            "dataset_info should be an object or an array, got {}",
            other
        ))
        .into()),
    }
}

/// Every split name across all configurations, deduplicated, in first-seen
/// order.
pub fn get_dataset_split_names(repo_id: &str, options: &InfoOptions) -> Result<Vec<String>> {
    let infos = get_dataset_infos(repo_id, options)?;
    let mut names = Vec::new();
    for info in &infos {
        for split in &info.splits {
            if let Some(name) = &split.name {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
    }
    Ok(names)
}

pub fn get_dataset_config_names(repo_id: &str, options: &InfoOptions) -> Result<Vec<String>> {
    let infos = get_dataset_infos(repo_id, options)?;
    let mut names = Vec::new();
    for info in &infos {
        if let Some(name) = &info.config_name {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
    Ok(names)
}
