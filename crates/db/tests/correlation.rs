mod support;

use ledger_core::{InfraType, MatchKind};
use rust_decimal_macros::dec;
use support::{
    AwsRow, OcpStorageRow, OcpUsageRow, aws_provider, day, load_aws_rows, load_ocp_storage_rows,
    load_ocp_usage_rows, manifest_for, ocp_provider, setup_db, tags,
};

#[test]
fn shared_volume_cost_splits_across_namespaces_and_feeds_summary() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    let aws = aws_provider(db);
    let ocp = ocp_provider(db, "my-ocp-cluster");
    let aws_manifest = manifest_for(db, &aws, &["cur.csv"]);
    let ocp_manifest = manifest_for(db, &ocp, &["storage.csv"]);

    load_aws_rows(
        db,
        &aws_manifest,
        "cur.csv",
        &[AwsRow {
            start: "2019-03-01T00:00:00Z",
            resource_id: "vol-1",
            product: "AmazonEBS",
            cost: dec!(100.00),
            amount: dec!(1),
            tags: tags(&[("openshift_project", "billing")]),
        }],
    );
    load_ocp_storage_rows(
        db,
        &ocp_manifest,
        "storage.csv",
        "my-ocp-cluster",
        &[
            OcpStorageRow {
                start: "2019-03-01T00:00:00Z",
                namespace: "billing",
                pvc: "ledger",
                pv_labels: tags(&[]),
                pvc_labels: tags(&[]),
            },
            OcpStorageRow {
                start: "2019-03-01T00:00:00Z",
                namespace: "billing-staging",
                pvc: "ledger-staging",
                pv_labels: tags(&[]),
                pvc_labels: tags(&[("openshift_project", "billing")]),
            },
        ],
    );
    let d = day("2019-03-01");
    db.rebuild_daily(&aws, aws_manifest.id, "cur.csv", d, d)
        .expect("aws daily");
    db.rebuild_daily(&ocp, ocp_manifest.id, "storage.csv", d, d)
        .expect("ocp daily");

    let outcome = db.correlate_day(std::slice::from_ref(&ocp), &aws, d).expect("correlate");
    assert_eq!(outcome.cloud_items, 1);
    assert_eq!(outcome.matched_items, 1);
    assert_eq!(outcome.match_rows, 2);
    assert_eq!(outcome.allocated_cost, dec!(100));

    let stored = db.ocp_cloud_line_item_daily(&ocp, d).expect("stored");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].shared_projects, 2);
    assert!(stored[0].matches.iter().all(|item| item.kind == MatchKind::Tag));
    assert!(
        stored[0]
            .matches
            .iter()
            .all(|item| item.allocated_cost == dec!(50))
    );

    let summary = db.summary_rows(Some(ocp.uuid)).expect("summary");
    assert_eq!(summary.len(), 2);
    for row in &summary {
        assert_eq!(row.infrastructure_cost, dec!(50));
        assert_eq!(row.cost, dec!(50));
    }

    let again = db.correlate_day(std::slice::from_ref(&ocp), &aws, d).expect("correlate again");
    assert_eq!(again.match_rows, 2);
    assert_eq!(db.ocp_cloud_line_item_daily(&ocp, d).expect("stored").len(), 1);
}

#[test]
fn resource_overlap_identifies_cluster_infrastructure() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    let aws = aws_provider(db);
    let ocp = ocp_provider(db, "my-ocp-cluster");
    let aws_manifest = manifest_for(db, &aws, &["cur.csv"]);
    let ocp_manifest = manifest_for(db, &ocp, &["usage.csv"]);
    let d = day("2019-03-01");

    assert!(!db.cluster_runs_on(&ocp, InfraType::Aws).expect("infra"));

    load_aws_rows(
        db,
        &aws_manifest,
        "cur.csv",
        &[AwsRow {
            start: "2019-03-01T00:00:00Z",
            resource_id: "i-0abc",
            product: "AmazonEC2",
            cost: dec!(10),
            amount: dec!(1),
            tags: tags(&[]),
        }],
    );
    load_ocp_usage_rows(
        db,
        &ocp_manifest,
        "usage.csv",
        "my-ocp-cluster",
        &[OcpUsageRow {
            start: "2019-03-01T00:00:00Z",
            namespace: "web",
            node: "node-1",
            pod: "web-1",
            resource_id: "i-0abc",
            cpu_seconds: dec!(60),
            ..Default::default()
        }],
    );
    db.rebuild_daily(&aws, aws_manifest.id, "cur.csv", d, d)
        .expect("aws daily");
    db.rebuild_daily(&ocp, ocp_manifest.id, "usage.csv", d, d)
        .expect("ocp daily");

    assert!(db.cluster_runs_on(&ocp, InfraType::Aws).expect("infra"));
    assert!(!db.cluster_runs_on(&ocp, InfraType::Azure).expect("infra"));
    assert_eq!(
        db.clusters_on_infra(InfraType::Aws).expect("keys"),
        vec!["my-ocp-cluster".to_string()]
    );

    let outcome = db.correlate_day(std::slice::from_ref(&ocp), &aws, d).expect("correlate");
    assert_eq!(outcome.matched_items, 1);
    let stored = db.ocp_cloud_line_item_daily(&ocp, d).expect("stored");
    assert_eq!(stored[0].matches[0].kind, MatchKind::ResourceId);
    assert_eq!(stored[0].matches[0].namespace, "web");
    assert_eq!(stored[0].matches[0].allocated_cost, dec!(10));
}

#[test]
fn unmatched_cloud_cost_stays_on_cloud_summary() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    let aws = aws_provider(db);
    let ocp = ocp_provider(db, "my-ocp-cluster");
    let aws_manifest = manifest_for(db, &aws, &["cur.csv"]);
    let d = day("2019-03-01");
    load_aws_rows(
        db,
        &aws_manifest,
        "cur.csv",
        &[AwsRow {
            start: "2019-03-01T00:00:00Z",
            resource_id: "i-unrelated",
            product: "AmazonEC2",
            cost: dec!(7),
            amount: dec!(1),
            tags: tags(&[("team", "data")]),
        }],
    );
    db.rebuild_daily(&aws, aws_manifest.id, "cur.csv", d, d)
        .expect("aws daily");

    let outcome = db.correlate_day(std::slice::from_ref(&ocp), &aws, d).expect("correlate");

    assert_eq!(outcome.cloud_items, 1);
    assert_eq!(outcome.matched_items, 0);
    assert!(db.ocp_cloud_line_item_daily(&ocp, d).expect("stored").is_empty());
    let cloud_summary = db.summary_rows(Some(aws.uuid)).expect("summary");
    assert_eq!(cloud_summary[0].cost, dec!(7));
}

#[test]
fn cloud_item_shared_by_two_clusters_is_split_once() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    let aws = aws_provider(db);
    let cluster_a = ocp_provider(db, "cluster-a");
    let cluster_b = ocp_provider(db, "cluster-b");
    let aws_manifest = manifest_for(db, &aws, &["cur.csv"]);
    let a_manifest = manifest_for(db, &cluster_a, &["storage.csv"]);
    let b_manifest = manifest_for(db, &cluster_b, &["storage.csv"]);
    let d = day("2019-03-01");

    load_aws_rows(
        db,
        &aws_manifest,
        "cur.csv",
        &[AwsRow {
            start: "2019-03-01T00:00:00Z",
            resource_id: "vol-shared",
            product: "AmazonEBS",
            cost: dec!(100.00),
            amount: dec!(1),
            tags: tags(&[("app", "shared")]),
        }],
    );
    for (manifest, cluster_id, namespace) in [
        (&a_manifest, "cluster-a", "alpha"),
        (&b_manifest, "cluster-b", "beta"),
    ] {
        load_ocp_storage_rows(
            db,
            manifest,
            "storage.csv",
            cluster_id,
            &[OcpStorageRow {
                start: "2019-03-01T00:00:00Z",
                namespace,
                pvc: "data",
                pv_labels: tags(&[("app", "shared")]),
                pvc_labels: tags(&[]),
            }],
        );
    }
    db.rebuild_daily(&aws, aws_manifest.id, "cur.csv", d, d)
        .expect("aws daily");
    db.rebuild_daily(&cluster_a, a_manifest.id, "storage.csv", d, d)
        .expect("cluster a daily");
    db.rebuild_daily(&cluster_b, b_manifest.id, "storage.csv", d, d)
        .expect("cluster b daily");

    let clusters = [cluster_a.clone(), cluster_b.clone()];
    let outcome = db.correlate_day(&clusters, &aws, d).expect("correlate");
    assert_eq!(outcome.matched_items, 1);
    assert_eq!(outcome.match_rows, 2);
    assert_eq!(outcome.allocated_cost, dec!(100));

    let mut total = dec!(0);
    for cluster in &clusters {
        let stored = db.ocp_cloud_line_item_daily(cluster, d).expect("stored");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].shared_projects, 2);
        assert_eq!(stored[0].matches.len(), 1);
        assert_eq!(stored[0].matches[0].allocated_cost, dec!(50));
        assert_eq!(stored[0].matches[0].cluster_id, cluster.cluster_id().unwrap_or_default());

        let infrastructure: rust_decimal::Decimal = db
            .summary_rows(Some(cluster.uuid))
            .expect("summary")
            .iter()
            .map(|row| row.infrastructure_cost)
            .sum();
        assert_eq!(infrastructure, dec!(50));
        total += infrastructure;
    }
    assert_eq!(total, dec!(100.00));

    // Correlating again with one cluster moves the whole item onto it.
    let outcome = db
        .correlate_day(std::slice::from_ref(&cluster_a), &aws, d)
        .expect("correlate one");
    assert_eq!(outcome.allocated_cost, dec!(100));
    assert!(db.ocp_cloud_line_item_daily(&cluster_b, d).expect("stored").is_empty());
    let leftover: rust_decimal::Decimal = db
        .summary_rows(Some(cluster_b.uuid))
        .expect("summary")
        .iter()
        .map(|row| row.infrastructure_cost)
        .sum();
    assert_eq!(leftover, dec!(0));
}
