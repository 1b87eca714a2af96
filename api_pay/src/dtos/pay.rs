use chrono::{DateTime, NaiveDateTime, Utc};
use common::{
    error::{AppError, Res},
    upload::{FormData, Upload},
};
use serde::{Deserialize, Serialize};

/// A job as submitted with its upfront checkout.
#[derive(Debug, Clone)]
pub struct JobDraft {
    pub subject: String,
    pub title: String,
    pub instructions: String,
    pub pages: i32,
    pub deadline: DateTime<Utc>,
    pub cited_resources: i32,
    pub formatting_style: String,
    pub writer_level: String,
    pub spacing: String,
    pub total_amount: f64,
    pub phone_number: String,
    pub country_code: String,
    pub files: Vec<Upload>,
}

/// ISO-8601 with an offset, or a naive date-time read as UTC.
pub fn parse_deadline(raw: &str) -> Res<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| AppError::Validation(format!("Invalid deadline: {}", raw)))
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Res<T> {
    raw.parse::<T>()
        .map_err(|_| AppError::Validation(format!("{} must be a valid number", name)))
}

impl JobDraft {
    pub fn from_form(mut form: FormData) -> Res<Self> {
        let pages: i32 = parse_number("pages", form.required("pages")?)?;
        if pages <= 0 {
            return Err(AppError::Validation("pages must be positive".to_string()));
        }
        let cited_resources: i32 = match form.text("citedResources") {
            Some(raw) => parse_number("citedResources", raw)?,
            None => 0,
        };
        if cited_resources < 0 {
            return Err(AppError::Validation(
                "citedResources cannot be negative".to_string(),
            ));
        }
        let total_amount: f64 = parse_number("totalAmount", form.required("totalAmount")?)?;
        if total_amount <= 0.0 {
            return Err(AppError::Validation(
                "totalAmount must be positive".to_string(),
            ));
        }

        Ok(JobDraft {
            subject: form.required("subject")?.to_string(),
            title: form.required("title")?.to_string(),
            instructions: form.required("instructions")?.to_string(),
            pages,
            deadline: parse_deadline(form.required("deadline")?)?,
            cited_resources,
            formatting_style: form.text("formattingStyle").unwrap_or("APA").to_string(),
            writer_level: form.required("writerLevel")?.to_lowercase(),
            spacing: form.text("spacing").unwrap_or("double").to_string(),
            total_amount,
            phone_number: form.text("phone_number").unwrap_or_default().to_string(),
            country_code: form.text("country_code").unwrap_or("KE").to_string(),
            files: form.take_files("files"),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub job_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub redirect_url: String,
    pub order_tracking_id: String,
    pub job_id: i64,
}

/// Gateway notification, from query parameters or a JSON body.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct IpnNotification {
    #[serde(rename = "OrderTrackingId")]
    pub order_tracking_id: Option<String>,
    #[serde(rename = "OrderMerchantReference")]
    pub order_merchant_reference: Option<String>,
    #[serde(rename = "OrderNotificationType")]
    pub order_notification_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpnAck {
    pub order_notification_type: Option<String>,
    pub order_tracking_id: Option<String>,
    pub order_merchant_reference: Option<String>,
    pub status: u16,
}
