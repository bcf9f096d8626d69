use anyhow::Result;

use tryplay::stream::{candidate_order, classify, BackendKind};

pub fn cmd_classify(url: &str, prefer: Option<BackendKind>, json: bool) -> Result<()> {
    let classification = classify(url);
    let order = candidate_order(url, prefer);

    if json {
        let value = serde_json::json!({
            "url": url,
            "hint": classification.hint,
            "preferred": prefer,
            "candidates": order,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("URL:   {url}");
    println!("Hint:  {:?}", classification.hint);
    if let Some(kind) = prefer {
        println!("Prefer: {kind}");
    }
    println!("Order:");
    for (i, kind) in order.iter().enumerate() {
        println!("  {}. {kind}", i + 1);
    }
    Ok(())
}
