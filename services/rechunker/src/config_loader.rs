//! Job file loader for the rechunker.
//!
//! Job files are YAML documents describing one [`RemapJob`]. Environment
//! variables are substituted before parsing using `${VAR}` and
//! `${VAR:-default}` syntax, so paths can point at per-site storage roots.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use remap_engine::chunk_plan::MAX_RANK;
use remap_engine::RemapJob;

/// Load, expand and validate a job file.
pub fn load_job<P: AsRef<Path>>(path: P) -> Result<RemapJob> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read job file {:?}", path.as_ref()))?;

    let expanded = expand_env_vars(&content)?;

    let job: RemapJob = serde_yaml::from_str(&expanded)
        .with_context(|| format!("Failed to parse job file {:?}", path.as_ref()))?;

    validate_job(&job)?;

    Ok(job)
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in YAML content
/// Supports ${VAR} and ${VAR:-default} syntax
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::new();
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut var_expr = String::new();
            let mut brace_count = 1;

            while brace_count > 0 {
                match chars.next() {
                    Some('{') => {
                        brace_count += 1;
                        var_expr.push('{');
                    }
                    Some('}') => {
                        brace_count -= 1;
                        if brace_count > 0 {
                            var_expr.push('}');
                        }
                    }
                    Some(c) => var_expr.push(c),
                    None => anyhow::bail!("Unclosed variable substitution: ${{{}", var_expr),
                }
            }

            let value = resolve_var_expr(&var_expr)?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Resolve variable expression (supports VAR and VAR:-default syntax)
fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim())
            .with_context(|| format!("Environment variable {} not set", expr))
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_job(job: &RemapJob) -> Result<()> {
    anyhow::ensure!(!job.variables.is_empty(), "Job lists no variables");

    anyhow::ensure!(
        job.source != job.destination,
        "Source and destination are the same store: {:?}",
        job.source
    );

    for (rank, chunks) in &job.chunks_per_rank {
        anyhow::ensure!(
            (1..=MAX_RANK).contains(rank),
            "Chunks given for rank {}, supported ranks are 1-{}",
            rank,
            MAX_RANK
        );
        anyhow::ensure!(
            chunks.len() == *rank,
            "Chunks {:?} do not have rank {}",
            chunks,
            rank
        );
        anyhow::ensure!(
            !chunks.contains(&0),
            "Chunks {:?} contain a zero extent",
            chunks
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_simple() {
        std::env::set_var("RECHUNKER_TEST_ROOT", "/scratch/data");
        let result = expand_env_vars("source: ${RECHUNKER_TEST_ROOT}/in.zarr").unwrap();
        assert_eq!(result, "source: /scratch/data/in.zarr");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        std::env::remove_var("RECHUNKER_NONEXISTENT");
        let result = expand_env_vars("zoom: ${RECHUNKER_NONEXISTENT:-7}").unwrap();
        assert_eq!(result, "zoom: 7");
    }

    #[test]
    fn test_expand_env_vars_missing_required() {
        std::env::remove_var("RECHUNKER_REQUIRED");
        assert!(expand_env_vars("${RECHUNKER_REQUIRED}").is_err());
        assert!(expand_env_vars("${UNCLOSED").is_err());
    }

    #[test]
    fn test_resolve_var_expr_override_default() {
        std::env::set_var("RECHUNKER_SET", "custom");
        assert_eq!(resolve_var_expr("RECHUNKER_SET:-default").unwrap(), "custom");
    }

    #[test]
    fn test_load_job() {
        std::env::set_var("RECHUNKER_JOB_ROOT", "/data");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.yaml");
        fs::write(
            &path,
            r#"
source: ${RECHUNKER_JOB_ROOT}/ifs.zarr
destination: ${RECHUNKER_JOB_ROOT}/ifs_healpix.zarr
zoom: 7
chunks_per_rank:
  2: [168, 4096]
variables:
  psl: msl
  mrso:
    function: sum
    params: [swvl1, swvl2, swvl3, swvl4]
"#,
        )
        .unwrap();

        let job = load_job(&path).unwrap();
        assert_eq!(job.source, Path::new("/data/ifs.zarr"));
        assert_eq!(job.chunks_per_rank[&2], vec![168, 4096]);
        assert_eq!(job.variables.len(), 2);
    }

    #[test]
    fn test_validate_job_rejects_bad_chunks() {
        let mut job: RemapJob = serde_yaml::from_str(
            "{source: a, destination: b, variables: {tas: t2m}, chunks_per_rank: {4: [1, 1, 1, 1]}}",
        )
        .unwrap();
        assert!(validate_job(&job).is_err());

        job.chunks_per_rank.clear();
        job.chunks_per_rank.insert(2, vec![24]);
        assert!(validate_job(&job).is_err());

        job.chunks_per_rank.insert(2, vec![24, 0]);
        assert!(validate_job(&job).is_err());

        job.chunks_per_rank.insert(2, vec![24, 4096]);
        assert!(validate_job(&job).is_ok());

        job.destination = job.source.clone();
        assert!(validate_job(&job).is_err());
    }
}
