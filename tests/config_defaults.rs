use aoscan::config::{from_args, CliArgs, View, ARIO_PROCESS_ID, DEFAULT_CU_URL, DEFAULT_GRAPHQL_URL};
use clap::Parser;
use std::time::Duration;

#[test]
fn defaults_cover_every_knob() {
    let cfg = from_args(CliArgs::try_parse_from(["aoscan"]).unwrap()).unwrap();
    assert_eq!(cfg.graphql_url, DEFAULT_GRAPHQL_URL);
    assert_eq!(cfg.cu_url, DEFAULT_CU_URL);
    assert_eq!(cfg.ario_process_id, ARIO_PROCESS_ID);
    assert_eq!(cfg.view, View::Messages);
    assert_eq!(cfg.page_size, 25);
    assert_eq!(cfg.request_timeout(), Duration::from_secs(60));
    assert_eq!(cfg.throttle_delay(), Duration::from_millis(200));
    assert_eq!(cfg.retry_max, 3);
    assert_eq!(cfg.retry_base(), Duration::from_secs(1));
    assert_eq!(cfg.ant_cache_ttl(), Duration::from_secs(300));
    assert_eq!(cfg.ant_cache_max, 100);
    assert_eq!(cfg.arns_cache_ttl(), Duration::from_secs(86_400));
    assert_eq!(cfg.history_max, 5);
    assert_eq!(cfg.render_fps, 30);
}

#[test]
fn cli_flags_override_defaults() {
    let args = CliArgs::try_parse_from([
        "aoscan",
        "-v",
        "entity",
        "-t",
        "0x1234567890abcdef1234567890abcdef12345678",
        "--page-size",
        "50",
        "--history-db",
        ":memory:",
    ])
    .unwrap();
    let cfg = from_args(args).unwrap();
    assert_eq!(cfg.view, View::Entity);
    assert_eq!(cfg.page_size, 50);
    assert_eq!(cfg.history_db_path, ":memory:");
}
