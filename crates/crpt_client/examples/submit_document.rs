// examples/submit_document.rs
//
// Submits a batch of documents concurrently through one rate-limited client.
//
//   CRPT_SIGNATURE=<base64 signature> CRPT_REQUEST_LIMIT=2 \
//     cargo run -p crpt_client --example submit_document
//
// Ctrl-C cancels submissions that are still waiting for a slot.

use std::env;
use std::time::Instant;

use crpt_client::{CrptClientConfig, Description, Document, DocumentSubmitter, Product};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DOCUMENTS: usize = 5;

fn sample_document(n: usize) -> Document {
    Document::builder()
        .description(Description::new("7700000000"))
        .doc_id(format!("example-{n}"))
        .doc_status("NEW")
        .doc_type("LP_INTRODUCE_GOODS")
        .owner_inn("7700000000")
        .participant_inn("7700000000")
        .producer_inn("7700000000")
        .production_date("2024-01-15")
        .production_type("OWN_PRODUCTION")
        .products(vec![
            Product::builder()
                .tnved_code("6403990000")
                .uit_code(format!("0104650117240408213{n:04}"))
                .build(),
        ])
        .reg_date("2024-01-16")
        .reg_number(format!("REG-{n}"))
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,crpt_client=debug,sliding_window=debug")),
        )
        .init();

    let signature = env::var("CRPT_SIGNATURE").unwrap_or_else(|_| {
        warn!("CRPT_SIGNATURE is not set; the API will reject the request");
        "unsigned".to_string()
    });

    let config = CrptClientConfig::from_env()?;
    let submitter = DocumentSubmitter::new(config)?;
    info!(?submitter, "Submitting {DOCUMENTS} documents");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let started = Instant::now();
    let mut handles = Vec::with_capacity(DOCUMENTS);
    for n in 0..DOCUMENTS {
        let submitter = submitter.clone();
        let signature = signature.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let document = sample_document(n);
            let result = submitter
                .submit_with_cancel(&document, &signature, &cancel)
                .await;
            (document.doc_id, result)
        }));
    }

    for handle in handles {
        let (doc_id, result) = handle.await?;
        let elapsed_ms = started.elapsed().as_millis();
        match result {
            Ok(()) => info!(%doc_id, elapsed_ms, "Accepted"),
            Err(e) if e.is_api() => warn!(%doc_id, elapsed_ms, error = %e, "Rejected"),
            Err(e) if e.is_cancelled() => warn!(%doc_id, elapsed_ms, "Cancelled"),
            Err(e) => error!(%doc_id, elapsed_ms, error = %e, "Failed"),
        }
    }

    Ok(())
}
