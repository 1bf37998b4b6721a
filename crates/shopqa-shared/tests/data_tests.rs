//! Relation loading and result cache tests.
//!
//! Tests verify:
//! - Header trimming and order date-time parsing on load
//! - CSV failures name the offending file
//! - Cached tables are retrievable by deterministic query id

use std::fs;

use chrono::NaiveDate;
use shopqa_shared::{make_query_id, ResultCache, Session, Table, TableKind, TableSet, Value};

fn write(dir: &std::path::Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

#[test]
fn test_load_dir_trims_headers_and_parses_order_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "orders.csv",
        " order_id , customer_id,order_status,order_purchase_timestamp,order_approved_at,order_delivered_timestamp\n\
         o1,c1,delivered,2018-01-05 10:00:00,2018-01-05 11:30:00,2018-01-12\n\
         o2,c2,canceled,2018-02-01 09:15:00,,\n",
    );
    write(
        dir.path(),
        "customers.csv",
        "customer_id,customer_zip_code_prefix,customer_city,customer_state\nc1,01310,sao paulo,SP\n",
    );

    let tables = TableSet::load_dir(dir.path()).unwrap();
    assert_eq!(tables.len(), 2);
    assert!(!tables.contains(TableKind::Payments));

    let orders = tables.get(TableKind::Orders).unwrap();
    assert_eq!(orders.columns[0], "order_id");
    assert_eq!(orders.columns[1], "customer_id");

    let purchase = orders.column_index("order_purchase_timestamp").unwrap();
    let expected = NaiveDate::from_ymd_opt(2018, 1, 5).unwrap().and_hms_opt(10, 0, 0).unwrap();
    assert_eq!(orders.rows[0][purchase], Value::DateTime(expected));

    let delivered = orders.column_index("order_delivered_timestamp").unwrap();
    assert!(orders.rows[0][delivered].as_datetime().is_some());
    assert_eq!(orders.rows[1][delivered], Value::Null);

    // only the orders relation gets date-time parsing
    let customers = tables.get(TableKind::Customers).unwrap();
    assert_eq!(customers.rows[0][1], Value::Int(1310));
}

#[test]
fn test_load_dir_reports_bad_csv() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("payments.csv"), [0xff, 0xfe, b',', b'\n', 0xff]).unwrap();
    let err = TableSet::load_dir(dir.path()).unwrap_err();
    assert!(err.to_string().contains("payments.csv"));
}

#[test]
fn test_session_opens_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "products.csv", "product_id,product_category_name\np1,toys\n");
    let session = Session::open(dir.path()).unwrap();
    assert_eq!(session.tables.len(), 1);
    assert!(session.cache().is_empty());
}

#[test]
fn test_datetime_parts_for_charting() {
    let dt = NaiveDate::from_ymd_opt(2017, 11, 24).unwrap().and_hms_opt(8, 0, 0).unwrap();
    let table = Table::from_rows(
        "result",
        &["order_purchase_timestamp", "value"],
        vec![vec![Value::DateTime(dt), Value::Int(3)]],
    );
    let enriched = table.with_datetime_parts();
    assert_eq!(
        enriched.columns,
        vec![
            "order_purchase_timestamp",
            "value",
            "order_purchase_timestamp_year",
            "order_purchase_timestamp_month",
            "order_purchase_timestamp_date",
        ]
    );
    assert_eq!(enriched.rows[0][2], Value::Int(2017));
    assert_eq!(enriched.rows[0][3], Value::Int(11));
    assert_eq!(enriched.rows[0][4], Value::Text("2017-11-24".into()));
}

#[test]
fn test_cache_put_get_contract() {
    let table = Table::from_rows(
        "result",
        &["category", "value"],
        vec![vec![Value::Text("2018".into()), Value::Float(1.5)]],
    );
    let mut cache = ResultCache::new();
    cache.put("order_total_sales", table.clone());
    assert_eq!(cache.get("order_total_sales"), Some(&table));
    assert_eq!(cache.get("nonexistent_id"), None);
}

#[test]
fn test_query_ids_are_deterministic() {
    assert_eq!(
        make_query_id("order", "  Total   Sales "),
        make_query_id("order", "total sales")
    );
    assert_ne!(
        make_query_id("order", "total sales"),
        make_query_id("product", "total sales")
    );
}
