use crate::api::SafeKeeperConfigOptions;

/// Builds the safekeeper argument vector following `--id`, a total function
/// of the profile's option record. Scalar options are always emitted with
/// their defaulted values; nullable options only when set; boolean flags as
/// `--flag=true` only when true, except the metric-collection inverse which
/// is emitted as `false` when disabled.
pub fn build_safekeeper_args(cluster_name: &str, opts: &SafeKeeperConfigOptions) -> Vec<String> {
    let mut args = vec![
        "--listen_pg=0.0.0.0:5432".to_string(),
        "--listen_http=0.0.0.0:9898".to_string(),
        format!("--broker_endpoint=http://{cluster_name}-broker:50051"),
    ];

    // Node & cluster configuration
    args.push(format!("--datadir={}", opts.data_dir));
    if let Some(zone) = &opts.availability_zone {
        args.push(format!("--availability_zone={zone}"));
    }
    args.push(format!("--broker_keepalive_interval={}", opts.broker_keepalive_interval));
    args.push(format!("--heartbeat_timeout={}", opts.heartbeat_timeout));
    if opts.peer_recovery {
        args.push("--peer_recovery=true".to_string());
    }

    // WAL management & storage
    args.push(format!("--max_offloader_lag={}", opts.max_offloader_lag));
    args.push(format!(
        "--max_reelect_offloader_lag_bytes={}",
        opts.max_reelect_offloader_lag_bytes
    ));
    args.push(format!(
        "--max_timeline_disk_usage_bytes={}",
        opts.max_timeline_disk_usage_bytes
    ));
    args.push(format!("--wal_backup_parallel_jobs={}", opts.wal_backup_parallel_jobs));
    if opts.disable_wal_backup {
        args.push("--disable_wal_backup=true".to_string());
    }
    if let Some(syncs) = opts.remote_storage_max_concurrent_syncs {
        args.push(format!("--remote_storage_max_concurrent_syncs={syncs}"));
    }
    if let Some(errors) = opts.remote_storage_max_sync_errors {
        args.push(format!("--remote_storage_max_sync_errors={errors}"));
    }

    // Authentication & security
    if let Some(path) = &opts.pg_auth_public_key_path {
        args.push(format!("--pg_auth_public_key_path={path}"));
    }
    if let Some(path) = &opts.pg_tenant_only_auth_public_key_path {
        args.push(format!("--pg_tenant_only_auth_public_key_path={path}"));
    }
    if let Some(path) = &opts.http_auth_public_key_path {
        args.push(format!("--http_auth_public_key_path={path}"));
    }
    if let Some(path) = &opts.auth_token_path {
        args.push(format!("--auth_token_path={path}"));
    }
    if let Some(file) = &opts.ssl_key_file {
        args.push(format!("--ssl_key_file={file}"));
    }
    if let Some(file) = &opts.ssl_cert_file {
        args.push(format!("--ssl_cert_file={file}"));
    }
    if let Some(period) = &opts.ssl_cert_reload_period {
        args.push(format!("--ssl_cert_reload_period={period}"));
    }
    if let Some(file) = &opts.ssl_ca_file {
        args.push(format!("--ssl_ca_file={file}"));
    }
    if opts.use_https_safekeeper_api {
        args.push("--use_https_safekeeper_api=true".to_string());
    }
    if opts.enable_tls_wal_service_api {
        args.push("--enable_tls_wal_service_api=true".to_string());
    }

    // Safety & reliability
    if opts.no_sync {
        args.push("--no_sync=true".to_string());
    }
    if opts.enable_offload {
        args.push("--enable_offload=true".to_string());
    }
    if opts.delete_offloaded_wal {
        args.push("--delete_offloaded_wal=true".to_string());
    }

    // Backup & maintenance
    args.push(format!("--partial_backup_timeout={}", opts.partial_backup_timeout));
    args.push(format!("--partial_backup_concurrency={}", opts.partial_backup_concurrency));
    args.push(format!("--control_file_save_interval={}", opts.control_file_save_interval));
    args.push(format!("--eviction_min_resident={}", opts.eviction_min_resident));
    if opts.disable_periodic_broker_push {
        args.push("--disable_periodic_broker_push=true".to_string());
    }

    // Performance & monitoring
    args.push(format!("--log_format={}", opts.log_format));
    if !opts.force_metric_collection_on_scrape {
        args.push("--force_metric_collection_on_scrape=false".to_string());
    }

    // Concurrency & sharding
    if opts.wal_reader_fanout {
        args.push("--wal_reader_fanout=true".to_string());
    }
    if let Some(delta) = opts.max_delta_for_fanout {
        args.push(format!("--max_delta_for_fanout={delta}"));
    }
    if opts.current_thread_runtime {
        args.push("--current_thread_runtime=true".to_string());
    }
    if opts.walsenders_keep_horizon {
        args.push("--walsenders_keep_horizon=true".to_string());
    }

    // Disk management
    args.push(format!("--global_disk_check_interval={}", opts.global_disk_check_interval));
    args.push(format!("--max_global_disk_usage_ratio={}", opts.max_global_disk_usage_ratio));

    // Development & debugging
    if opts.dev {
        args.push("--dev=true".to_string());
    }
    if opts.enable_pull_timeline_on_startup {
        args.push("--enable_pull_timeline_on_startup=true".to_string());
    }

    if let Some(addr) = &opts.listen_pg_tenant_only {
        args.push(format!("--listen_pg_tenant_only={addr}"));
    }
    if let Some(addr) = &opts.advertise_pg {
        args.push(format!("--advertise_pg={addr}"));
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LogFormat;

    #[test]
    fn defaulted_record_emits_every_scalar() {
        let args = build_safekeeper_args("c1", &SafeKeeperConfigOptions::default());
        let expected = vec![
            "--listen_pg=0.0.0.0:5432",
            "--listen_http=0.0.0.0:9898",
            "--broker_endpoint=http://c1-broker:50051",
            "--datadir=./data",
            "--broker_keepalive_interval=15s",
            "--heartbeat_timeout=5s",
            "--max_offloader_lag=134217728",
            "--max_reelect_offloader_lag_bytes=0",
            "--max_timeline_disk_usage_bytes=0",
            "--wal_backup_parallel_jobs=5",
            "--ssl_key_file=server.key",
            "--ssl_cert_file=server.crt",
            "--ssl_cert_reload_period=60s",
            "--partial_backup_timeout=15m",
            "--partial_backup_concurrency=5",
            "--control_file_save_interval=300s",
            "--eviction_min_resident=15m",
            "--log_format=plain",
            "--global_disk_check_interval=60s",
            "--max_global_disk_usage_ratio=0",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn booleans_appear_only_when_true() {
        let mut opts = SafeKeeperConfigOptions::default();
        assert!(!build_safekeeper_args("c1", &opts)
            .iter()
            .any(|a| a.starts_with("--no_sync") || a.starts_with("--peer_recovery")));

        opts.no_sync = true;
        opts.peer_recovery = true;
        opts.dev = true;
        let args = build_safekeeper_args("c1", &opts);
        assert!(args.contains(&"--no_sync=true".to_string()));
        assert!(args.contains(&"--peer_recovery=true".to_string()));
        assert!(args.contains(&"--dev=true".to_string()));
    }

    #[test]
    fn metric_collection_flag_is_inverted() {
        let mut opts = SafeKeeperConfigOptions::default();
        assert!(!build_safekeeper_args("c1", &opts)
            .iter()
            .any(|a| a.starts_with("--force_metric_collection_on_scrape")));

        opts.force_metric_collection_on_scrape = false;
        let args = build_safekeeper_args("c1", &opts);
        assert!(args.contains(&"--force_metric_collection_on_scrape=false".to_string()));
    }

    #[test]
    fn nullable_options_emit_when_set() {
        let mut opts = SafeKeeperConfigOptions::default();
        opts.availability_zone = Some("eu-north-1a".into());
        opts.remote_storage_max_concurrent_syncs = Some(10);
        opts.max_delta_for_fanout = Some(1024);
        opts.advertise_pg = Some("sk-0.safekeeper:5432".into());
        opts.log_format = LogFormat::Json;

        let args = build_safekeeper_args("c1", &opts);
        assert!(args.contains(&"--availability_zone=eu-north-1a".to_string()));
        assert!(args.contains(&"--remote_storage_max_concurrent_syncs=10".to_string()));
        assert!(args.contains(&"--max_delta_for_fanout=1024".to_string()));
        assert!(args.contains(&"--advertise_pg=sk-0.safekeeper:5432".to_string()));
        assert!(args.contains(&"--log_format=json".to_string()));
    }

    #[test]
    fn vector_is_deterministic() {
        let opts = SafeKeeperConfigOptions::default();
        assert_eq!(build_safekeeper_args("c1", &opts), build_safekeeper_args("c1", &opts));
    }
}
