//! Booking service endpoints

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;

use super::client::ApiClient;

#[derive(Debug, Deserialize)]
struct Booking {
    id: String,
    event_id: String,
    seats: i64,
    status: String,
}

/// Fetch and display the current user's bookings.
pub async fn list_bookings(client: &ApiClient) -> Result<()> {
    let resp = client.get("/my-bookings").await?;
    let bookings: Vec<Booking> = resp
        .json()
        .await
        .context("Failed to parse bookings response")?;

    if bookings.is_empty() {
        println!("No bookings yet.");
        return Ok(());
    }

    println!();
    for booking in &bookings {
        println!(
            "{}  event {}  {} seat(s)  [{}]",
            booking.id, booking.event_id, booking.seats, booking.status
        );
    }

    Ok(())
}

/// Reserve seats for an event. The booking starts out pending until payment
/// completes.
pub async fn create_booking(client: &ApiClient, event_id: &str, seats: u32) -> Result<()> {
    let resp = client
        .post("/book", &json!({ "event_id": event_id, "seats": seats }))
        .await?;
    let booking: Booking = resp
        .json()
        .await
        .context("Failed to parse booking response")?;

    println!(
        "Booked {} seat(s) for event {} (booking {}, status: {}).",
        booking.seats, booking.event_id, booking.id, booking.status
    );
    println!("Run 'eventbook-cli pay --booking-id {}' to complete payment.", booking.id);

    Ok(())
}
