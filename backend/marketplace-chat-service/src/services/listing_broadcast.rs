//! Fans a "listing posted" announcement out to every authenticated session
//! except the poster. Fire-and-forget: nothing is queued for offline users.

use crate::models::ListingNotification;
use crate::services::presence::PresenceRegistry;
use crate::store::ChatStore;
use crate::websocket::message_types::WsOutboundEvent;
use crate::websocket::SessionId;
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use tracing::{info, warn};

pub const PRICE_NOT_SPECIFIED: &str = "Price not specified";
pub const UNKNOWN_POSTER_NAME: &str = "A user";
pub const LISTING_NOTIFICATION_TITLE: &str = "New Listing Posted";

/// Announcement from the listing subsystem
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListingPosted {
    pub poster_id: i64,
    pub listing_id: i64,
    pub listing_type: String,
    pub listing_title: String,
    /// Number or numeric string on the wire
    #[serde(default, deserialize_with = "deserialize_price")]
    pub listing_price: Option<f64>,
    #[serde(default)]
    pub listing_image: Option<String>,
}

fn deserialize_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPrice {
        Number(f64),
        Text(String),
        Other(serde_json::Value),
    }

    Ok(match Option::<RawPrice>::deserialize(deserializer)? {
        Some(RawPrice::Number(n)) => Some(n),
        Some(RawPrice::Text(s)) => s.trim().replace(',', "").parse().ok(),
        Some(RawPrice::Other(_)) | None => None,
    })
}

/// US-dollar formatting with thousands separators.
///
/// Whole amounts drop the cents (`$25,000`); anything else keeps two
/// decimals (`$1,234.50`). Missing, zero and non-finite prices read as
/// "Price not specified".
pub fn format_price(price: Option<f64>) -> String {
    let Some(amount) = price.filter(|p| p.is_finite() && *p != 0.0) else {
        return PRICE_NOT_SPECIFIED.to_string();
    };

    let sign = if amount < 0.0 { "-" } else { "" };
    let amount = amount.abs();
    let text = if amount.fract() == 0.0 {
        format!("{amount:.0}")
    } else {
        format!("{amount:.2}")
    };

    let (whole, cents) = match text.split_once('.') {
        Some((whole, cents)) => (whole, Some(cents)),
        None => (text.as_str(), None),
    };

    let mut out = format!("{sign}${}", group_thousands(whole));
    if let Some(cents) = cents {
        out.push('.');
        out.push_str(cents);
    }
    out
}

fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[derive(Clone)]
pub struct ListingNotifier {
    store: Arc<dyn ChatStore>,
    presence: PresenceRegistry,
}

impl ListingNotifier {
    pub fn new(store: Arc<dyn ChatStore>, presence: PresenceRegistry) -> Self {
        Self { store, presence }
    }

    async fn poster_name(&self, poster_id: i64) -> String {
        match self.store.user_profiles(&[poster_id]).await {
            Ok(profiles) => profiles
                .into_iter()
                .find(|p| p.id == poster_id)
                .map(|p| p.name)
                .unwrap_or_else(|| UNKNOWN_POSTER_NAME.to_string()),
            Err(e) => {
                warn!(poster_id, error = %e, "poster lookup failed");
                UNKNOWN_POSTER_NAME.to_string()
            }
        }
    }

    pub async fn build(&self, posted: ListingPosted) -> ListingNotification {
        let poster_name = self.poster_name(posted.poster_id).await;
        let listing_price = format_price(posted.listing_price);
        let body = format!(
            "{poster_name} just posted {}: {} for {listing_price}",
            posted.listing_type, posted.listing_title
        );

        ListingNotification {
            listing_id: posted.listing_id,
            listing_type: posted.listing_type,
            listing_title: posted.listing_title,
            listing_price,
            listing_image: posted.listing_image,
            poster_id: posted.poster_id,
            poster_name,
            title: LISTING_NOTIFICATION_TITLE.to_string(),
            body,
            timestamp: Utc::now(),
        }
    }

    /// Build the notification and send it to everyone online but the
    /// poster. Returns the number of sessions reached.
    pub async fn notify(&self, posted: ListingPosted, origin: Option<SessionId>) -> usize {
        let poster_id = posted.poster_id;
        let listing_id = posted.listing_id;
        let notification = self.build(posted).await;

        let reached = self
            .presence
            .broadcast_to_online(
                WsOutboundEvent::NewListingNotification(notification),
                poster_id,
                origin,
            )
            .await;

        info!(poster_id, listing_id, reached, "listing notification broadcast");
        reached
    }
}
