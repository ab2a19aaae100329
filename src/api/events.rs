//! Event catalog endpoints

use anyhow::{Context, Result};
use serde::Deserialize;

use super::client::ApiClient;

#[derive(Debug, Deserialize)]
struct Event {
    id: String,
    title: String,
    description: Option<String>,
    date: Option<String>,
    venue: Option<String>,
    capacity: i64,
}

/// Fetch and display upcoming events from the catalog service.
pub async fn list_events(client: &ApiClient) -> Result<()> {
    let resp = client.get("/events").await?;
    let events: Vec<Event> = resp.json().await.context("Failed to parse events response")?;

    if events.is_empty() {
        println!("No events found.");
        return Ok(());
    }

    println!();
    for event in &events {
        println!("{}  {}", event.id, event.title);
        if let Some(venue) = &event.venue {
            println!("    venue:    {}", venue);
        }
        if let Some(date) = &event.date {
            println!("    date:     {}", date);
        }
        println!("    capacity: {}", event.capacity);
        if let Some(desc) = &event.description {
            println!("    {}", desc);
        }
    }

    Ok(())
}
