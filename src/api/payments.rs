//! Payment service endpoints

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;

use super::client::ApiClient;

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    payment_id: String,
    message: String,
    requires_verification: bool,
}

/// Pay for a pending booking.
pub async fn process_payment(
    client: &ApiClient,
    booking_id: &str,
    amount: f64,
    phone_number: &str,
) -> Result<()> {
    let resp = client
        .post(
            "/process-payment",
            &json!({
                "booking_id": booking_id,
                "amount": amount,
                "phone_number": phone_number,
            }),
        )
        .await?;
    let payment: PaymentResponse = resp
        .json()
        .await
        .context("Failed to parse payment response")?;

    println!("Payment {}: {}", payment.payment_id, payment.message);
    if payment.requires_verification {
        println!("Verification required; check your phone to confirm.");
    }

    Ok(())
}
