use serde::{Deserialize, Serialize};

/// Per-(user, server) grant. The server's owner is implicitly authorized
/// and never needs a row here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerAccess {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "serverId")]
    pub server_id: String,
    pub permissions: Vec<String>,
}
