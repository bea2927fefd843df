//! Cross-backend query lowering. Driver backends are opened with `min: 0`
//! pools, so no store is contacted: lowering is pure.

use polystore::{
    ConnectOptions, Connection, ConnectionConfig, PoolConfig, Value, compile_filter, f,
    parse_lookup,
};

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
    .expect("driver opens without contacting the store")
}

async fn all_backends(prefix: &str) -> Vec<Connection> {
    vec![
        open(
            "surrealdb",
            &format!("{prefix}-surrealdb"),
            ConnectionConfig::new().with("url", "mem://"),
        )
        .await,
        open(
            "clickhouse",
            &format!("{prefix}-clickhouse"),
            ConnectionConfig::new(),
        )
        .await,
        open(
            "redis",
            &format!("{prefix}-redis"),
            ConnectionConfig::new(),
        )
        .await,
    ]
}

#[tokio::test]
async fn expression_and_lookup_syntaxes_lower_identically() {
    for conn in all_backends("equivalence").await {
        let expression = f("age").gt(30).and(f("is_active").eq(true));

        let lookup = parse_lookup("age__gt", Value::Int(30))
            .unwrap()
            .and(parse_lookup("is_active", Value::Bool(true)).unwrap());

        let lowered_expression = compile_filter(&expression, conn.backend()).unwrap();
        let lowered_lookup = compile_filter(&lookup, conn.backend()).unwrap();
        assert_eq!(
            lowered_expression,
            lowered_lookup,
            "syntaxes diverge on '{}'",
            conn.backend_id()
        );
    }
}

#[tokio::test]
async fn every_operator_lowers_on_every_backend() {
    let filters = vec![
        f("age").eq(30),
        f("age").ne(30),
        f("age").lt(30),
        f("age").lte(30),
        f("age").gt(30),
        f("age").gte(30),
        f("name").is_in(["a", "b"]),
        f("name").not_in(["a", "b"]),
        f("name").contains("doe"),
        f("name").like("jo%"),
        f("name").ilike("JO%"),
        f("age").between(18, 65),
        f("email").is_null(),
        f("email").is_not_null(),
    ];

    for conn in all_backends("operators").await {
        for filter in &filters {
            let lowered = compile_filter(filter, conn.backend()).unwrap();
            assert!(
                !lowered.is_empty(),
                "empty lowering for {filter:?} on '{}'",
                conn.backend_id()
            );
        }
    }
}

#[tokio::test]
async fn empty_in_and_not_in_lower_to_constants_everywhere() {
    for conn in all_backends("empty-in").await {
        let never =
            compile_filter(&f("age").is_in(Vec::<i64>::new()), conn.backend()).unwrap();
        let always =
            compile_filter(&f("age").not_in(Vec::<i64>::new()), conn.backend()).unwrap();
        assert_ne!(never, always, "on '{}'", conn.backend_id());
    }
}

#[tokio::test]
async fn escaping_is_collision_safe_per_dialect() {
    for conn in all_backends("escaping").await {
        let hostile = Value::Text("x' OR \"1\"=\"1".into());
        let literal = conn.backend().format_value(&hostile);
        // The payload must come back quoted with its quote characters
        // neutralized, never spliced bare.
        assert_ne!(literal, "x' OR \"1\"=\"1", "on '{}'", conn.backend_id());
        assert!(
            literal.starts_with('\'') || literal.starts_with('"'),
            "unquoted literal {literal:?} on '{}'",
            conn.backend_id()
        );
    }
}

#[tokio::test]
async fn unknown_backend_reports_available_names() {
    polystore::register_builtin_drivers();
    let err = polystore::backends().get("mongodb").unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("mongodb"));
    assert!(rendered.contains("surrealdb"));
    assert!(rendered.contains("clickhouse"));
    assert!(rendered.contains("redis"));
}
