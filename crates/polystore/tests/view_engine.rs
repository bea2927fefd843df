//! Materialized view compilation across backends: one declarative class,
//! native dialect per store.

use polystore::{
    Capabilities, ConnectOptions, Connection, ConnectionConfig, Func, PoolConfig, StoreError,
    ViewDefinition, f,
};
use polystore_test_support::{Call, RecordingBackend, sales_schema};

fn daily_summary(backend: &str) -> ViewDefinition {
    ViewDefinition::builder(sales_schema(backend), "daily_sales_summary")
        .engine("SummingMergeTree")
        .order_by(["date", "seller_name"])
        .dimension_with("date", "date_collected", Func::ToDate("date_collected".into()))
        .dimension("seller_name", "seller_name")
        .metric("total_sales", Func::Sum("offer_price".into()))
        .metric("total_quantity", Func::Sum("quantity".into()))
        .metric("transaction_count", Func::Count)
        .metric("avg_price", Func::Avg("offer_price".into()))
        .metric("max_price", Func::Max("offer_price".into()))
        .build()
        .unwrap()
}

async fn open(backend: &str, name: &str, config: ConnectionConfig) -> Connection {
    polystore::create_connection(
        ConnectOptions::new(backend)
            .name(name)
            .config(config)
            .pool(PoolConfig {
                min: 0,
                ..PoolConfig::default()
            }),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn columnar_compilation_uses_native_aggregates() {
    let conn = open("clickhouse", "views-ch", ConnectionConfig::new()).await;
    let view = daily_summary("clickhouse");

    let select = view.compile_select(conn.backend()).unwrap();
    assert_eq!(
        select,
        "SELECT toDate(date_collected) AS date, seller_name, \
         sum(offer_price) AS total_sales, sum(quantity) AS total_quantity, \
         count() AS transaction_count, avg(offer_price) AS avg_price, \
         max(offer_price) AS max_price FROM sales_data GROUP BY date, seller_name"
    );
}

#[tokio::test]
async fn document_graph_compilation_uses_its_function_namespace() {
    let conn = open(
        "surrealdb",
        "views-surreal",
        ConnectionConfig::new().with("url", "mem://"),
    )
    .await;
    let view = daily_summary("surrealdb");

    let select = view.compile_select(conn.backend()).unwrap();
    assert_eq!(
        select,
        "SELECT time::day(date_collected) AS date, seller_name, \
         math::sum(offer_price) AS total_sales, math::sum(quantity) AS total_quantity, \
         count() AS transaction_count, math::mean(offer_price) AS avg_price, \
         math::max(offer_price) AS max_price FROM sales_data GROUP BY date, seller_name"
    );
}

#[tokio::test]
async fn compilation_is_deterministic_across_rebuilds() {
    let conn = open("clickhouse", "views-determinism", ConnectionConfig::new()).await;
    let first = daily_summary("clickhouse")
        .compile_select(conn.backend())
        .unwrap();
    let second = daily_summary("clickhouse")
        .compile_select(conn.backend())
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn filters_and_having_render_into_where_and_having() {
    let backend = RecordingBackend::columnar().into_arc();
    let schema = sales_schema("fake-columnar");

    let view = ViewDefinition::builder(schema, "busy_sellers")
        .dimension("seller_name", "seller_name")
        .metric("transaction_count", Func::Count)
        .filter(f("marketplace").eq("Amazon"))
        .having(f("transaction_count").gte(10))
        .build()
        .unwrap();

    let select = view.compile_select(backend.as_ref()).unwrap();
    assert_eq!(
        select,
        "SELECT seller_name, count() AS transaction_count FROM sales_data \
         WHERE marketplace = 'Amazon' GROUP BY seller_name \
         HAVING transaction_count >= 10"
    );
}

#[tokio::test]
async fn create_and_refresh_go_through_the_backend() {
    let backend = RecordingBackend::columnar().into_arc();
    let conn = Connection::new("test", backend.clone());
    let view = ViewDefinition::builder(sales_schema("fake-columnar"), "seller_summary")
        .dimension("seller_name", "seller_name")
        .metric("transaction_count", Func::Count)
        .build()
        .unwrap();

    view.create(&conn).await.unwrap();
    view.refresh(&conn).await.unwrap();
    view.drop(&conn).await.unwrap();

    let calls = backend.calls();
    assert!(matches!(&calls[0], Call::CreateView { name, .. } if name == "seller_summary"));
    assert!(matches!(&calls[1], Call::RefreshView { name } if name == "seller_summary"));
    assert!(matches!(&calls[2], Call::DropView { name } if name == "seller_summary"));
}

#[tokio::test]
async fn stores_without_views_fail_create_but_answer_queries() {
    let backend = RecordingBackend::key_value().into_arc();
    let conn = Connection::new("test", backend.clone());
    let view = ViewDefinition::builder(sales_schema("fake-key-value"), "seller_summary")
        .dimension("seller_name", "seller_name")
        .metric("transaction_count", Func::Count)
        .build()
        .unwrap();

    let err = view.create(&conn).await.unwrap_err();
    match err {
        StoreError::Capability { capability, .. } => {
            assert_eq!(capability, Capabilities::MATERIALIZED_VIEWS);
        }
        other => panic!("expected capability error, got {other:?}"),
    }
}

#[tokio::test]
async fn querying_a_view_selects_from_the_artifact() {
    let backend = RecordingBackend::columnar().into_arc();
    let conn = Connection::new("test", backend.clone());
    let view = ViewDefinition::builder(sales_schema("fake-columnar"), "seller_summary")
        .dimension("seller_name", "seller_name")
        .metric("transaction_count", Func::Count)
        .build()
        .unwrap();

    backend.queue_rows("seller_summary", vec![]);
    view.query(&conn).await.unwrap();

    assert!(matches!(
        backend.calls().last().unwrap(),
        Call::Select { table, .. } if table == "seller_summary"
    ));
}

#[tokio::test]
async fn view_bound_to_another_backend_is_rejected() {
    let backend = RecordingBackend::columnar().into_arc();
    let conn = Connection::new("test", backend);
    // Schema bound to the document/graph fake, connection is columnar.
    let view = ViewDefinition::builder(sales_schema("fake-document-graph"), "mismatch")
        .dimension("seller_name", "seller_name")
        .metric("transaction_count", Func::Count)
        .build()
        .unwrap();

    assert!(matches!(
        view.create(&conn).await,
        Err(StoreError::Schema(_))
    ));
}
