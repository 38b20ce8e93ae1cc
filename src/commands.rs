pub(crate) mod repo_sync;
pub(crate) mod wildcard_tls;
