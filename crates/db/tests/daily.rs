mod support;

use ledger_core::{FileState, ProviderType};
use ledger_db::RawTable;
use rust_decimal_macros::dec;
use support::{
    AwsRow, OcpStorageRow, OcpUsageRow, aws_provider, day, load_aws_rows, load_ocp_storage_rows,
    load_ocp_usage_rows, manifest_for, ocp_provider, setup_db, tags,
};

fn hourly_rows() -> Vec<AwsRow<'static>> {
    vec![
        AwsRow {
            start: "2019-03-01T00:00:00Z",
            resource_id: "i-1",
            product: "AmazonEC2",
            cost: dec!(0.1000000001),
            amount: dec!(1),
            tags: tags(&[("app", "web"), ("env", "dev")]),
        },
        AwsRow {
            start: "2019-03-01T01:00:00Z",
            resource_id: "i-1",
            product: "AmazonEC2",
            cost: dec!(0.2),
            amount: dec!(1),
            tags: tags(&[("env", "prod")]),
        },
        AwsRow {
            start: "2019-03-01T02:00:00Z",
            resource_id: "i-2",
            product: "AmazonEC2",
            cost: dec!(5),
            amount: dec!(1),
            tags: tags(&[]),
        },
        AwsRow {
            start: "2019-03-02T00:00:00Z",
            resource_id: "i-1",
            product: "AmazonEC2",
            cost: dec!(0.7),
            amount: dec!(1),
            tags: tags(&[]),
        },
    ]
}

#[test]
fn aggregate_daily_is_lossless_per_day() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    let provider = aws_provider(db);
    let manifest = manifest_for(db, &provider, &["a.csv"]);
    load_aws_rows(db, &manifest, "a.csv", &hourly_rows());

    let inserted = db
        .aggregate_daily(provider.uuid, provider.provider_type, day("2019-03-01"), day("2019-03-02"))
        .expect("aggregate");
    assert_eq!(inserted, 3);

    for value in ["2019-03-01", "2019-03-02"] {
        let raw = db
            .raw_total_for_day(RawTable::AwsLineItem, provider.uuid, day(value), "unblended_cost")
            .expect("raw total");
        let daily = db
            .daily_total_for_day(RawTable::AwsLineItem, provider.uuid, day(value), "unblended_cost")
            .expect("daily total");
        assert_eq!(raw, daily);
    }
    assert_eq!(
        db.daily_total_for_day(
            RawTable::AwsLineItem,
            provider.uuid,
            day("2019-03-01"),
            "unblended_cost"
        )
        .expect("total"),
        dec!(5.3000000001)
    );
}

#[test]
fn later_tag_values_win_within_a_day() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    let provider = aws_provider(db);
    let manifest = manifest_for(db, &provider, &["a.csv"]);
    load_aws_rows(db, &manifest, "a.csv", &hourly_rows());
    db.aggregate_daily(provider.uuid, provider.provider_type, day("2019-03-01"), day("2019-03-01"))
        .expect("aggregate");

    let rows = db
        .daily_rows_for_day(provider.uuid, provider.provider_type, day("2019-03-01"))
        .expect("rows");
    let instance = rows
        .iter()
        .find(|row| row.key("resource_id") == Some("i-1"))
        .expect("i-1 row");

    assert_eq!(instance.usage_start, day("2019-03-01"));
    assert_eq!(instance.usage_end, day("2019-03-01"));
    assert_eq!(instance.sum("usage_amount"), Some(dec!(2)));
    assert_eq!(instance.tags[0].1, tags(&[("app", "web"), ("env", "prod")]));
}

#[test]
fn rebuild_daily_replaces_range_and_advances_file() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    let provider = aws_provider(db);
    let manifest = manifest_for(db, &provider, &["a.csv"]);
    load_aws_rows(db, &manifest, "a.csv", &hourly_rows());

    let first = db
        .rebuild_daily(&provider, manifest.id, "a.csv", day("2019-03-01"), day("2019-03-02"))
        .expect("rebuild");
    let second = db
        .rebuild_daily(&provider, manifest.id, "a.csv", day("2019-03-01"), day("2019-03-02"))
        .expect("rebuild again");

    assert_eq!(first.deleted, 0);
    assert_eq!(second.deleted, 3);
    assert_eq!(second.daily_rows, 3);
    assert_eq!(
        db.file_stat(manifest.id, "a.csv").expect("stat").committed_state,
        FileState::Aggregated
    );

    let summary = db.summary_rows(Some(provider.uuid)).expect("summary");
    assert_eq!(summary.len(), 2);
    let first_day = &summary[0];
    assert_eq!(first_day.source, "AWS");
    assert_eq!(first_day.account, "111111111111");
    assert_eq!(first_day.dimension, "AmazonEC2");
    assert_eq!(first_day.cost, dec!(5.3000000001));
    assert_eq!(first_day.infrastructure_cost, first_day.cost);
    assert_eq!(first_day.derived_cost, dec!(0));
    assert_eq!(first_day.cost_units, "USD");
    assert_eq!(first_day.usage_units, "Hrs");
    assert_eq!(first_day.resource_type, "BoxUsage:m5.large");
    assert!(first_day.cluster_metrics.is_none());
}

#[test]
fn usage_period_bounds_cover_loaded_days() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    let provider = aws_provider(db);
    let manifest = manifest_for(db, &provider, &["a.csv"]);
    assert_eq!(
        db.usage_period_bounds(provider.uuid, ProviderType::Aws)
            .expect("bounds"),
        None
    );

    load_aws_rows(db, &manifest, "a.csv", &hourly_rows());

    assert_eq!(
        db.usage_period_bounds(provider.uuid, ProviderType::Aws)
            .expect("bounds"),
        Some((day("2019-03-01"), day("2019-03-02")))
    );
    assert_eq!(
        db.file_usage_bounds(ProviderType::Aws, manifest.id, "a.csv")
            .expect("file bounds"),
        Some((day("2019-03-01"), day("2019-03-02")))
    );
}

#[test]
fn cluster_summary_unions_usage_and_storage_namespaces() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    let provider = ocp_provider(db, "my-ocp-cluster");
    let manifest = manifest_for(db, &provider, &["usage.csv", "storage.csv"]);
    load_ocp_usage_rows(
        db,
        &manifest,
        "usage.csv",
        "my-ocp-cluster",
        &[
            OcpUsageRow {
                start: "2019-03-01T00:00:00Z",
                namespace: "web",
                node: "node-1",
                pod: "web-1",
                resource_id: "i-1",
                cpu_seconds: dec!(3600),
                request_cpu_seconds: dec!(7200),
                limit_cpu_seconds: dec!(14400),
                memory_byte_seconds: dec!(3865470566400),
                request_memory_byte_seconds: dec!(7730941132800),
                node_cpu_cores: dec!(4),
                node_memory_bytes: dec!(8589934592),
                ..Default::default()
            },
            OcpUsageRow {
                start: "2019-03-01T01:00:00Z",
                namespace: "web",
                node: "node-1",
                pod: "web-1",
                resource_id: "i-1",
                cpu_seconds: dec!(1800),
                request_cpu_seconds: dec!(3600),
                memory_byte_seconds: dec!(3865470566400),
                node_cpu_cores: dec!(4),
                node_memory_bytes: dec!(8589934592),
                ..Default::default()
            },
            OcpUsageRow {
                start: "2019-03-01T01:00:00Z",
                namespace: "web",
                node: "node-2",
                pod: "web-2",
                resource_id: "i-2",
                node_cpu_cores: dec!(2),
                node_memory_bytes: dec!(4294967296),
                ..Default::default()
            },
        ],
    );
    load_ocp_storage_rows(
        db,
        &manifest,
        "storage.csv",
        "my-ocp-cluster",
        &[OcpStorageRow {
            start: "2019-03-01T00:00:00Z",
            namespace: "db",
            pvc: "data",
            pv_labels: tags(&[]),
            pvc_labels: tags(&[]),
        }],
    );

    db.aggregate_daily(provider.uuid, ProviderType::Ocp, day("2019-03-01"), day("2019-03-01"))
        .expect("aggregate");
    db.populate_daily_summary(&provider, day("2019-03-01"), day("2019-03-01"))
        .expect("summary");

    let summary = db.summary_rows(Some(provider.uuid)).expect("summary");
    assert_eq!(summary.len(), 2);
    let db_row = summary.iter().find(|row| row.dimension == "db").expect("db");
    let web_row = summary.iter().find(|row| row.dimension == "web").expect("web");
    assert_eq!(web_row.account, "my-ocp-cluster");
    assert_eq!(web_row.usage, dec!(1.5));
    assert_eq!(web_row.usage_units, "Core-Hours");
    assert_eq!(web_row.cost, dec!(0));
    assert_eq!(web_row.resource_type, "");
    let web = web_row.cluster_metrics.as_ref().expect("web metrics");
    assert_eq!(web.pod_usage_cpu_core_hours, dec!(1.5));
    assert_eq!(web.pod_request_cpu_core_hours, dec!(3));
    assert_eq!(web.pod_limit_cpu_core_hours, dec!(4));
    assert_eq!(web.pod_usage_memory_gigabyte_hours, dec!(2));
    assert_eq!(web.pod_request_memory_gigabyte_hours, dec!(2));
    assert_eq!(web.pod_limit_memory_gigabyte_hours, dec!(0));
    assert_eq!(web.node_capacity_cpu_cores, dec!(6));
    assert_eq!(web.node_capacity_memory_gigabytes, dec!(12));

    assert_eq!(db_row.usage, dec!(0));
    let storage_only = db_row.cluster_metrics.as_ref().expect("db metrics");
    assert_eq!(storage_only.pod_request_cpu_core_hours, dec!(0));
    assert_eq!(storage_only.node_capacity_cpu_cores, dec!(0));
}
