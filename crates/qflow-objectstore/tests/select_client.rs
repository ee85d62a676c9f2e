use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};
use qflow_core::Message;
use qflow_objectstore::client::{SelectClient, SelectRequest};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn lineitem_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("l_orderkey", DataType::Int64, false),
        Field::new("l_extendedprice", DataType::Float64, true),
    ]))
}

#[tokio::test]
async fn streams_pipe_delimited_rows_into_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/select"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-object-bytes-scanned", "1000")
                .set_body_raw(
                    b"l_orderkey|l_extendedprice\n1|10.5\n2|20.0\n3|30.25\n".to_vec(),
                    "text/plain",
                ),
        )
        .mount(&server)
        .await;

    let client = SelectClient::new(server.uri());
    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let req = SelectRequest {
        object_key: "lineitem/part-0.tbl".to_string(),
        schema: lineitem_schema(),
        projection: vec!["l_orderkey".into(), "l_extendedprice".into()],
        predicate_sql: Some("l_extendedprice > 5".into()),
        batch_rows: 10,
    };

    let metrics = client.select_into(&req, &tx).await.unwrap();
    drop(tx);

    assert_eq!(metrics.rows_returned, 3);
    assert_eq!(metrics.bytes_scanned, 1000);
    assert_eq!(metrics.num_http_requests, 1);

    let mut total_rows = 0;
    while let Some(Message::Data(batch)) = rx.recv().await {
        total_rows += batch.num_rows();
    }
    assert_eq!(total_rows, 3);
}

#[tokio::test]
async fn emits_multiple_batches_once_batch_rows_is_reached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/select"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            b"l_orderkey|l_extendedprice\n1|1.0\n2|2.0\n3|3.0\n4|4.0\n".to_vec(),
            "text/plain",
        ))
        .mount(&server)
        .await;

    let client = SelectClient::new(server.uri());
    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let req = SelectRequest {
        object_key: "lineitem/part-0.tbl".to_string(),
        schema: lineitem_schema(),
        projection: vec![],
        predicate_sql: None,
        batch_rows: 2,
    };

    client.select_into(&req, &tx).await.unwrap();
    drop(tx);

    let mut batch_sizes = Vec::new();
    while let Some(Message::Data(batch)) = rx.recv().await {
        batch_sizes.push(batch.num_rows());
    }
    assert_eq!(batch_sizes, vec![2, 2]);
}
