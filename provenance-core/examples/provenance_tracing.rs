//! Example running the full provenance workflow with tracing enabled.
//!
//! Run with: RUST_LOG=provenance_core=debug cargo run -p provenance-core --example provenance_tracing

use image::{DynamicImage, Rgb, RgbImage};
use provenance_core::watermark::robustness::{evaluate, RobustnessConfig};
use provenance_core::{
    hamming_similarity, FusionInputs, FusionScorer, Fingerprinter, Ledger, Watermarker,
};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> provenance_core::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("provenance_core=debug,info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    println!("=== Provenance Tracing Demo ===\n");

    let image = DynamicImage::ImageRgb8(RgbImage::from_fn(256, 256, |x, y| {
        let v = 60 + ((x / 8 + y / 8) % 100) as u8;
        Rgb([v, 180 - v / 2, 90 + (x % 40) as u8])
    }));
    let payload = "1011001110001111";

    let ledger_path = std::env::temp_dir().join("provenance-demo.jsonl");
    let ledger = Ledger::open("demo-secret", &ledger_path)?;
    let watermarker = Watermarker::default();
    let marked = watermarker.embed(&image, payload)?;
    ledger.append(&serde_json::json!({
        "step": "watermark",
        "bits": payload.len(),
        "psnr": marked.psnr,
    }))?;
    println!("Ledger: {} ({} records)", ledger_path.display(), ledger.len());

    let fingerprinter = Fingerprinter::default();
    let similarity = hamming_similarity(
        &fingerprinter.phash(&image)?,
        &fingerprinter.phash(&marked.watermarked_image)?,
    )?;
    let extracted = watermarker.extract(&marked.watermarked_image, payload.len());

    let report = FusionScorer::default().fuse(
        &FusionInputs::new()
            .with_watermark_bits(payload, extracted)
            .with_phash_similarity(similarity)
            .with_ledger_integrity(!ledger.tamper_detected()),
    );
    println!("\nFusion: {}", report.to_json()?);

    let robustness = evaluate(&watermarker, &image, payload, &RobustnessConfig::default())?;
    println!("\nRobustness (clean BER {:.3}):", robustness.clean_ber);
    for result in &robustness.attacks {
        println!(
            "   {:<26} BER {:.3} {}",
            result.attack.to_string(),
            result.ber,
            if result.detected { "detected" } else { "lost" }
        );
    }
    println!("   detection rate: {:.0}%", robustness.detection_rate() * 100.0);

    Ok(())
}
