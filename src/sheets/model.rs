use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response body of `GET v4/spreadsheets/{id}/values/{range}`.
#[derive(Deserialize, Debug)]
pub struct ValueRange {
    #[serde(default)]
    pub range: Option<String>,
    #[serde(rename = "majorDimension", default)]
    pub major_dimension: Option<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

/// Request body of `PUT v4/spreadsheets/{id}/values/{range}`.
#[derive(Serialize, Debug)]
pub struct UpdateValueRange<'a> {
    pub range: &'a str,
    #[serde(rename = "majorDimension")]
    pub major_dimension: &'a str,
    pub values: Vec<Vec<Value>>,
}

#[derive(Deserialize, Debug)]
pub struct UpdateValuesResponse {
    #[serde(rename = "updatedRange", default)]
    pub updated_range: Option<String>,
    #[serde(rename = "updatedCells", default)]
    pub updated_cells: Option<u64>,
}
