use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub(crate) struct PostClipboardRequest {
    pub(crate) text: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct GetHistoryResponse {
    pub(crate) history: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct GetFilesResponse {
    pub(crate) files: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct UploadResponse {
    pub(crate) message: String,
    pub(crate) filename: String,
}
