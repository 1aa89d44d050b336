use serde::{Deserialize, Serialize};

/// Vendor capability description stored on a tracker.
///
/// The engine only passes it through; consumers use it to offer valid
/// project keys and issue types when creating tickets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub projects: Vec<Project>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(rename = "issueTypes", default)]
    pub issue_types: Vec<IssueType>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueType {
    pub id: String,
    pub name: String,
}
