//! Cache freshness overview.
//!
//! `dq status` lists every document the store exposes and whether its cached
//! text is fresh, stale (the document changed since extraction), or missing.
//! Useful after `dq preprocess` to see which documents failed.

use anyhow::Result;

use crate::cache::CacheStatus;
use crate::models::DocumentRef;
use crate::resolver::Resolver;

/// Run the status command: list documents and print the table on stdout.
pub async fn run_status(resolver: &Resolver) -> Result<()> {
    let rows = resolver.cache_status().await?;
    let config = resolver.config();
    println!("docquery: cache status");
    println!("======================");
    println!();
    println!("  Store:       {}", config.store.root.display());
    println!("  Cache:       {}", config.cache.dir.display());
    println!();
    print!("{}", render_status(&rows));
    Ok(())
}

/// The document table plus per-status totals.
pub fn render_status(rows: &[(DocumentRef, CacheStatus)]) -> String {
    if rows.is_empty() {
        return "  No documents found.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "  {:<40} {:<6} {:>10}   {}\n",
        "DOCUMENT", "FORMAT", "SIZE", "CACHE"
    ));
    out.push_str(&format!("  {}\n", "-".repeat(70)));

    let (mut fresh, mut stale, mut missing) = (0, 0, 0);
    for (doc, status) in rows {
        match status {
            CacheStatus::Fresh => fresh += 1,
            CacheStatus::Stale => stale += 1,
            CacheStatus::Missing => missing += 1,
        }
        let format = doc.format.map(|f| f.as_str()).unwrap_or("-");
        out.push_str(&format!(
            "  {:<40} {:<6} {:>10}   {}\n",
            doc.identity,
            format,
            format_bytes(doc.size),
            status.as_str()
        ));
    }

    out.push('\n');
    out.push_str(&format!(
        "  {} documents: {} fresh, {} stale, {} missing\n",
        rows.len(),
        fresh,
        stale,
        missing
    ));
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
