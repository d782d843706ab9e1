//! Structured fuzz target for webhook verification.
//!
//! Generates header triples and bodies with `arbitrary`. Half of the inputs
//! are signed with the verifier's own secret so that event parsing, which
//! only runs after a signature matches, is reached as well.

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use chrono::DateTime;
use libfuzzer_sys::fuzz_target;

use forge_authn::{
    WebhookEvent, WebhookHeaders, WebhookSecret, webhook::WebhookVerifier,
};

const NOW: i64 = 1_700_000_000;

#[derive(Debug, Arbitrary)]
struct FuzzedDelivery {
    id: Option<String>,
    timestamp: Option<String>,
    signature: Option<String>,
    /// Replace the signature with a valid one for `id` and `timestamp`.
    sign: bool,
    body: Vec<u8>,
}

fuzz_target!(|input: FuzzedDelivery| {
    let verifier =
        WebhookVerifier::new(WebhookSecret::from_bytes(b"fuzz".to_vec()), Duration::from_secs(300));
    let Some(now) = DateTime::from_timestamp(NOW, 0) else {
        return;
    };

    let mut headers = WebhookHeaders {
        id: input.id,
        timestamp: input.timestamp,
        signature: input.signature,
    };
    if input.sign
        && let (Some(id), Some(ts)) = (&headers.id, &headers.timestamp)
        && let Ok(ts) = ts.parse::<i64>()
    {
        headers.signature = verifier.sign(id, ts, &input.body).ok();
    }

    if let Ok(delivery) = verifier.verify(&input.body, &headers, now) {
        let _ = WebhookEvent::parse(delivery, &input.body);
    }
});
