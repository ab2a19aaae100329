//! API client module for the platform services

mod bookings;
pub mod client;
mod events;
mod payments;

use anyhow::Result;

use client::ApiClient;

/// List upcoming events (catalog service)
pub async fn list_events(client: &ApiClient) -> Result<()> {
    events::list_events(client).await
}

/// List the current user's bookings (booking service)
pub async fn list_bookings(client: &ApiClient) -> Result<()> {
    bookings::list_bookings(client).await
}

/// Book seats for an event (booking service)
pub async fn create_booking(client: &ApiClient, event_id: &str, seats: u32) -> Result<()> {
    bookings::create_booking(client, event_id, seats).await
}

/// Pay for a pending booking (payment service)
pub async fn process_payment(
    client: &ApiClient,
    booking_id: &str,
    amount: f64,
    phone_number: &str,
) -> Result<()> {
    payments::process_payment(client, booking_id, amount, phone_number).await
}
