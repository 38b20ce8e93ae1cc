use std::path::Path;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tokio::fs;
use tracing::info;

use super::plan::TlsPlan;
use super::templates::{
    build_api_site, build_default_site, build_error_page, build_index_page, build_ssl_params,
};
use crate::fs_util::{PUBLIC_FILE_MODE, write_with_mode};
use crate::utils::human_stamp;

/// Writes the shared TLS params, both sites, their `sites-enabled`
/// links and the static pages.
///
/// # Errors
/// Returns an error if any file or link cannot be written.
pub async fn write_site_configs(plan: &TlsPlan) -> Result<()> {
    write_with_mode(&plan.ssl_params, &build_ssl_params(), PUBLIC_FILE_MODE).await?;
    info!("Wrote {}", plan.ssl_params.display());

    let api_site = plan.api_site();
    write_with_mode(&api_site, &build_api_site(plan), PUBLIC_FILE_MODE).await?;
    info!("Wrote API reverse proxy site {}", api_site.display());

    let default_site = plan.default_site();
    write_with_mode(&default_site, &build_default_site(plan), PUBLIC_FILE_MODE).await?;
    info!("Wrote default site {}", default_site.display());

    fs::create_dir_all(&plan.sites_enabled)
        .await
        .with_context(|| format!("Failed to create {}", plan.sites_enabled.display()))?;
    for site in [&api_site, &default_site] {
        enable_site(site, &plan.sites_enabled).await?;
    }
    info!("Enabled nginx sites");

    let generated_at = human_stamp(OffsetDateTime::now_utc());
    write_with_mode(
        &plan.web_root.join("index.html"),
        &build_index_page(&plan.base_domain, &generated_at),
        PUBLIC_FILE_MODE,
    )
    .await?;
    write_with_mode(
        &plan.web_root.join("50x.html"),
        &build_error_page(&plan.base_domain),
        PUBLIC_FILE_MODE,
    )
    .await?;
    info!("Wrote static pages to {}", plan.web_root.display());
    Ok(())
}

/// Replaces `<enabled_dir>/<site name>` with a symlink to `site`.
async fn enable_site(site: &Path, enabled_dir: &Path) -> Result<()> {
    let name = site
        .file_name()
        .with_context(|| format!("Invalid site path {}", site.display()))?;
    let link = enabled_dir.join(name);
    if fs::symlink_metadata(&link).await.is_ok() {
        fs::remove_file(&link)
            .await
            .with_context(|| format!("Failed to remove {}", link.display()))?;
    }
    fs::symlink(site, &link)
        .await
        .with_context(|| format!("Failed to link {} to {}", link.display(), site.display()))
}
