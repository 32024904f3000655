//! Single and batch ASIN resolution commands.

use std::path::Path;
use tokio::runtime::Runtime;

use crate::config::Config;
use crate::error::{Error, ResultExt};
use crate::query::Query;
use crate::resolver::{Resolution, ResolveOptions};

use super::open_resolver;

/// Resolve the ASIN of one book
#[allow(clippy::too_many_arguments)]
pub fn cmd_resolve(
    rt: &Runtime,
    config: Config,
    title: &str,
    author: Option<&str>,
    isbn: Option<&str>,
    verbose: bool,
    no_fuzzy: bool,
    threshold: Option<f32>,
    api_key: Option<&str>,
) -> anyhow::Result<()> {
    let query = build_query(title, author, isbn)?;

    if let Some(t) = threshold.filter(|t| !(0.0..=1.0).contains(t)) {
        return Err(Error::invalid_query(format!(
            "--threshold must be between 0.0 and 1.0, got {}",
            t
        ))
        .into());
    }

    let opts = ResolveOptions {
        verbose,
        fuzzy: no_fuzzy.then_some(false),
        fuzzy_threshold: threshold,
    };

    let resolution = rt.block_on(async {
        let resolver = open_resolver(config, api_key).await?;
        anyhow::Ok(resolver.resolve(&query, opts).await)
    })?;

    if verbose {
        for event in &resolution.trace {
            println!("{}", event);
        }
        println!();
    }

    print_resolution(&describe(&query), &resolution);

    if !resolution.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Resolve every query in a tab-separated file
pub fn cmd_batch(
    rt: &Runtime,
    config: Config,
    file: &Path,
    concurrency: usize,
    no_fuzzy: bool,
    api_key: Option<&str>,
) -> anyhow::Result<()> {
    let contents =
        std::fs::read_to_string(file).with_context(format!("Failed to read {}", file.display()))?;

    let queries: Vec<Query> = contents.lines().filter_map(parse_batch_line).collect();
    if queries.is_empty() {
        println!("No queries found in {:?}", file);
        return Ok(());
    }

    println!("Resolving {} queries...", queries.len());
    println!();

    let opts = ResolveOptions {
        fuzzy: no_fuzzy.then_some(false),
        ..ResolveOptions::default()
    };

    let results = rt.block_on(async {
        let resolver = open_resolver(config, api_key).await?;
        anyhow::Ok(resolver.resolve_batch(&queries, opts, concurrency).await)
    })?;

    let mut found = 0;
    let mut cached = 0;
    for (query, resolution) in queries.iter().zip(&results) {
        print_resolution(&describe(query), resolution);
        if resolution.is_success() {
            found += 1;
            if resolution.source == crate::resolver::service::CACHE_SOURCE {
                cached += 1;
            }
        }
    }

    println!();
    println!("=== Summary ===");
    println!("  Resolved:   {}", found);
    println!("  From cache: {}", cached);
    println!("  Failed:     {}", queries.len() - found);

    Ok(())
}

fn build_query(title: &str, author: Option<&str>, isbn: Option<&str>) -> crate::Result<Query> {
    let mut query = Query::new(title);
    if let Some(author) = author {
        query = query.with_author(author);
    }
    if let Some(isbn) = isbn {
        query = query.with_isbn(isbn);
    }

    if query.is_empty() {
        return Err(Error::invalid_query(
            "a title or an ISBN is required (--title \"Book Title\" or --isbn 9780765311788)",
        ));
    }
    Ok(query)
}

/// Parse `title<TAB>author<TAB>isbn`. Blank lines and `#` comments are skipped;
/// trailing fields are optional.
fn parse_batch_line(line: &str) -> Option<Query> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.trim_start().starts_with('#') {
        return None;
    }

    let mut fields = line.split('\t').map(str::trim);
    let title = fields.next().unwrap_or_default();
    let author = fields.next().filter(|a| !a.is_empty());
    let isbn = fields.next().filter(|i| !i.is_empty());

    let mut query = Query::new(title);
    if let Some(author) = author {
        query = query.with_author(author);
    }
    if let Some(isbn) = isbn {
        query = query.with_isbn(isbn);
    }

    (!query.is_empty()).then_some(query)
}

fn describe(query: &Query) -> String {
    match (query.title().is_empty(), query.author(), query.isbn()) {
        (true, _, Some(isbn)) => format!("ISBN {}", isbn),
        (false, Some(author), _) => format!("{} by {}", query.title(), author),
        _ => query.title().to_string(),
    }
}

fn print_resolution(label: &str, resolution: &Resolution) {
    match &resolution.asin {
        Some(asin) => {
            let confidence = resolution
                .confidence
                .map(|c| format!(", {:.0}%", c * 100.0))
                .unwrap_or_default();
            println!(
                "✓ {}: {} ({}{}, {:.1}s)",
                label,
                asin,
                resolution.source,
                confidence,
                resolution.elapsed.as_secs_f32()
            );
        }
        None => {
            println!("✗ {}: not found", label);
            for error in &resolution.errors {
                println!("    {}: {}", error.source, error.message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_is_rejected() {
        let err = build_query("  ", None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
        assert!(build_query("", None, Some("978-0-7653-1178-8")).is_ok());
    }

    #[test]
    fn test_resolve_rejects_empty_query_before_any_lookup() {
        let rt = Runtime::new().unwrap();
        let err = cmd_resolve(&rt, Config::default(), "", None, None, false, false, None, None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_batch_missing_file_has_context() {
        let rt = Runtime::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.tsv");

        let err = cmd_batch(&rt, Config::default(), &missing, 2, false, None).unwrap_err();
        let err = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(err, Error::WithContext { .. }));
        assert!(err.to_string().starts_with("Failed to read"));
    }

    #[test]
    fn test_parse_batch_line_full() {
        let query = parse_batch_line("Mistborn\tBrandon Sanderson\t9780765311788").unwrap();
        assert_eq!(query.title(), "Mistborn");
        assert_eq!(query.author(), Some("Brandon Sanderson"));
        assert_eq!(query.isbn(), Some("9780765311788"));
    }

    #[test]
    fn test_parse_batch_line_isbn_only() {
        let query = parse_batch_line("\t\t9780765311788").unwrap();
        assert!(query.title().is_empty());
        assert_eq!(query.isbn(), Some("9780765311788"));
        assert_eq!(describe(&query), "ISBN 9780765311788");
    }

    #[test]
    fn test_parse_batch_line_skips_blank_and_comments() {
        assert!(parse_batch_line("").is_none());
        assert!(parse_batch_line("   ").is_none());
        assert!(parse_batch_line("# title\tauthor\tisbn").is_none());
        assert!(parse_batch_line("\t\t").is_none());
    }

    #[test]
    fn test_describe_with_author() {
        let query = Query::new("Elantris").with_author("Brandon Sanderson");
        assert_eq!(describe(&query), "Elantris by Brandon Sanderson");
    }
}
