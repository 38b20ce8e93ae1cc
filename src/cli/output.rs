use std::path::Path;

use hostprep::repo::SyncReport;
use hostprep::repo::known_hosts::KnownHostsOutcome;
use hostprep::repo::reconcile::ReconcileOutcome;
use hostprep::tls::TlsReport;

pub(crate) fn print_sync_summary(report: &SyncReport, log_file: Option<&Path>) {
    println!("repo-sync summary");
    println!("- repository: {}", report.url);
    println!("- destination: {}", report.dest.display());
    println!("- ssh keys: {}", report.keys);
    println!("- host keys: {}", describe_known_hosts(report.known_hosts));
    println!(
        "- ssh connection: {}",
        if report.connection.is_authenticated() {
            "authenticated"
        } else {
            "not verified"
        }
    );
    println!("- result: {}", describe_outcome(&report.outcome));
    print_log_file(log_file);
}

pub(crate) fn print_sync_failure(code: i32, log_file: Option<&Path>) {
    println!("repo-sync failed with exit code {code}");
    print_log_file(log_file);
}

pub(crate) fn print_tls_summary(
    report: &TlsReport,
    token: Option<&str>,
    show_secrets: bool,
    log_file: Option<&Path>,
) {
    let plan = &report.plan;
    println!("wildcard-tls summary");
    println!("- certificate: {} and {}", plan.base_domain, plan.wildcard_domain);
    println!("- certificate files: {}", plan.fullchain.display());
    println!("- api host: https://{}", plan.api_host);
    println!("- upstream: 127.0.0.1:{}", plan.upstream_port);
    println!("- renewal hook: {}", plan.hook_script.display());
    println!("- renewal log: {}", plan.renewal_log.display());
    if let Some(token) = token {
        println!("- dns api token: {}", display_secret(token, show_secrets));
    }
    print_log_file(log_file);
}

pub(crate) fn print_tls_failure(phase: Option<&str>, log_file: Option<&Path>) {
    match phase {
        Some(phase) => println!("wildcard-tls failed during: {phase}"),
        None => println!("wildcard-tls failed before any phase ran"),
    }
    print_log_file(log_file);
}

fn print_log_file(log_file: Option<&Path>) {
    if let Some(path) = log_file {
        println!("- log file: {}", path.display());
    }
}

fn describe_known_hosts(outcome: KnownHostsOutcome) -> String {
    match outcome {
        KnownHostsOutcome::Skipped => "not checked".to_string(),
        KnownHostsOutcome::AlreadyPresent => "already trusted".to_string(),
        KnownHostsOutcome::Added { verified } => format!("added ({verified} verified)"),
    }
}

fn describe_outcome(outcome: &ReconcileOutcome) -> String {
    match outcome {
        ReconcileOutcome::Simulated => "simulated clone".to_string(),
        ReconcileOutcome::Unchanged => "existing checkout left unchanged".to_string(),
        ReconcileOutcome::Updated { branch } => format!("updated {branch}"),
        ReconcileOutcome::Reset { branch } => format!("reset {branch} to origin"),
        ReconcileOutcome::Cloned {
            branch,
            previous: Some(previous),
        } => format!(
            "cloned {branch} (previous checkout moved to {})",
            previous.display()
        ),
        ReconcileOutcome::Cloned {
            branch,
            previous: None,
        } => format!("cloned {branch}"),
    }
}

pub(crate) fn display_secret(value: &str, show_secrets: bool) -> String {
    if show_secrets {
        value.to_string()
    } else {
        mask_value(value)
    }
}

pub(crate) fn mask_value(value: &str) -> String {
    let trimmed = value.trim();
    match trimmed.char_indices().rev().nth(3) {
        Some((start, _)) if start > 0 => format!("****{}", &trimmed[start..]),
        _ => "****".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_mask_value_keeps_last_four() {
        assert_eq!(mask_value("abcdef123456"), "****3456");
        assert_eq!(mask_value("abcd"), "****");
        assert_eq!(mask_value(""), "****");
    }

    #[test]
    fn test_display_secret() {
        assert_eq!(display_secret("token-value", true), "token-value");
        assert_eq!(display_secret("token-value", false), "****alue");
    }

    #[test]
    fn test_describe_outcome() {
        assert_eq!(
            describe_outcome(&ReconcileOutcome::Cloned {
                branch: "main".to_string(),
                previous: Some(PathBuf::from("/opt/app_old_1")),
            }),
            "cloned main (previous checkout moved to /opt/app_old_1)"
        );
        assert_eq!(
            describe_outcome(&ReconcileOutcome::Updated {
                branch: "main".to_string()
            }),
            "updated main"
        );
        assert_eq!(
            describe_known_hosts(KnownHostsOutcome::Added { verified: 2 }),
            "added (2 verified)"
        );
    }
}
