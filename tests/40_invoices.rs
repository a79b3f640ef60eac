mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Datelike, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::task::JoinSet;

use common::{onboard_owner, patient, Owner};

fn number(body: &Value) -> String {
    body["data"]["invoice_number"].as_str().unwrap_or_default().to_string()
}

async fn new_patient(owner: &Owner, phone: &str) -> Result<String> {
    let (status, body) = owner.post("/patients", patient("Latha", phone, "General")).await?;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    Ok(body["data"]["id"].as_str().unwrap_or_default().to_string())
}

fn consultation() -> Value {
    json!([{ "description": "Consultation", "quantity": 1, "unit_price": 300 }])
}

#[tokio::test]
async fn paid_invoices_are_locked_for_edits() -> Result<()> {
    if !common::live_database() {
        return Ok(());
    }
    let owner = onboard_owner("billing", None).await?;
    let (status, body) = owner.post("/treatment-types", json!({ "name": "Physiotherapy", "price": 800 })).await?;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (status, body) = owner.post("/patients", patient("Suresh", "9123456780", "Physiotherapy")).await?;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let invoice = &body["data"]["invoice"];
    assert_eq!(invoice["status"], "draft");
    assert_eq!(invoice["invoice_number"], json!(format!("INV-{}-0001", Utc::now().year())));
    let id = invoice["id"].as_str().unwrap_or_default().to_string();

    let (status, body) = owner
        .post(&format!("/invoices/{}/mark-as-paid", id), json!({ "payment_mode": "UPI", "utr": "UTR123456" }))
        .await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["status"], "paid_unverified");

    let (status, body) = owner
        .post(
            &format!("/invoices/{}/line-items", id),
            json!({ "description": "Extra session", "unit_price": 400 }),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    common::assert_error_envelope(&body);
    assert_eq!(body["message"], "Can only edit draft invoices");
    Ok(())
}

#[tokio::test]
async fn invoice_numbers_are_dense_per_clinic_and_year() -> Result<()> {
    if !common::live_database() {
        return Ok(());
    }
    let owner = onboard_owner("counter", None).await?;
    let patient_id = new_patient(&owner, "9000011111").await?;
    let year = Utc::now().year();

    let mut numbers = Vec::new();
    for _ in 0..3 {
        let (status, body) = owner
            .post("/invoices", json!({ "patient_id": patient_id, "line_items": consultation() }))
            .await?;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        numbers.push(number(&body));
    }
    let expected: Vec<String> = (1..=3).map(|n| format!("INV-{}-{:04}", year, n)).collect();
    assert_eq!(numbers, expected);

    let (status, body) = owner.get(&format!("/invoices/by-number?number={}", expected[1])).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(number(&body), expected[1]);
    assert_eq!(body["data"]["line_items"].as_array().map(Vec::len), Some(1));

    // A second clinic starts its own sequence
    let other = onboard_owner("counter-other", None).await?;
    let other_patient = new_patient(&other, "9000011111").await?;
    let (_, body) = other
        .post("/invoices", json!({ "patient_id": other_patient, "line_items": consultation() }))
        .await?;
    assert_eq!(number(&body), expected[0]);

    let (status, _) = other.get(&format!("/invoices/by-number?number={}", expected[2])).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn concurrent_invoices_never_skip_or_reuse_numbers() -> Result<()> {
    if !common::live_database() {
        return Ok(());
    }
    let owner = onboard_owner("rush", None).await?;
    let patient_id = new_patient(&owner, "9000022222").await?;
    let year = Utc::now().year();

    let owner = Arc::new(owner);
    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let owner = owner.clone();
        let body = json!({ "patient_id": patient_id, "line_items": consultation() });
        tasks.spawn(async move { owner.post("/invoices", body).await });
    }

    let mut numbers = BTreeSet::new();
    while let Some(joined) = tasks.join_next().await {
        let (status, body) = joined??;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert!(numbers.insert(number(&body)), "duplicate invoice number");
    }
    let expected: BTreeSet<String> = (1..=8).map(|n| format!("INV-{}-{:04}", year, n)).collect();
    assert_eq!(numbers, expected);
    Ok(())
}
