use serde::{Deserialize, Serialize};

use super::repo_types::Subscriber;

#[derive(Debug, Deserialize)]
pub struct SubscribeForm {
    pub email: String,
}

/// `sid` query of the activation and unsubscribe links.
#[derive(Debug, Deserialize)]
pub struct LinkQuery {
    #[serde(default)]
    pub sid: String,
}

#[derive(Debug, Deserialize)]
pub struct MailForm {
    pub subject: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub succeed: bool,
    pub message: &'static str,
}

impl MessageResponse {
    pub fn ok(message: &'static str) -> Self {
        Self {
            succeed: true,
            message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub succeed: bool,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct SubscriberListResponse {
    pub succeed: bool,
    pub count: i64,
    pub subscribers: Vec<Subscriber>,
}

#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub succeed: bool,
    pub delivered: usize,
    pub failed: usize,
}
