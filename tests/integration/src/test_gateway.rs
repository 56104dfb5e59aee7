//! Gateway routing, control endpoints and registry behavior.

#[cfg(test)]
mod tests {
    use mockstack_core::ResourceScope;
    use reqwest::{Method, StatusCode};
    use serde_json::{Value, json};

    use crate::TestServer;

    async fn queue_urls(ts: &TestServer) -> usize {
        let (_, body) = ts.json_call("1.0", "AmazonSQS.ListQueues", json!({})).await;
        body["QueueUrls"].as_array().map_or(0, Vec::len)
    }

    #[tokio::test]
    async fn test_should_report_enabled_services_in_health() {
        let ts = TestServer::start_with(vec!["sqs", "wafv2"]).await;
        let resp = ts
            .request(Method::GET, "/_mockstack/health")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(
            body["services"],
            json!({ "sqs": "running", "wafv2": "running" })
        );
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_should_reject_unknown_service_with_plain_text() {
        let ts = TestServer::start().await;
        let resp = ts
            .request(Method::POST, "/")
            .header("x-amz-target", "Acme_2024.DoThing")
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(
            resp.headers()
                .get("content-type")
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        assert_eq!(resp.text().await.unwrap(), "unknown service: acme_2024");
    }

    #[tokio::test]
    async fn test_should_not_route_to_disabled_service() {
        let ts = TestServer::start_with(vec!["sqs"]).await;
        let (status, _) = ts.s3(Method::GET, "/", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(queue_urls(&ts).await, 0);
    }

    #[tokio::test]
    async fn test_should_clear_state_through_reset_endpoint() {
        let ts = TestServer::start().await;
        ts.json_call("1.0", "AmazonSQS.CreateQueue", json!({ "QueueName": "a" }))
            .await;
        ts.s3(Method::PUT, "/kept-bucket", "").await;
        assert_eq!(queue_urls(&ts).await, 1);

        let resp = ts
            .request(Method::POST, "/_mockstack/reset")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert!(body["reset"].as_array().unwrap().contains(&json!("sqs")));

        assert_eq!(queue_urls(&ts).await, 0);
        let (_, xml) = ts.s3(Method::GET, "/", "").await;
        assert!(!xml.contains("kept-bucket"));
    }

    #[tokio::test]
    async fn test_should_clear_state_through_server_handle() {
        let ts = TestServer::start().await;
        ts.json_call("1.0", "AmazonSQS.CreateQueue", json!({ "QueueName": "b" }))
            .await;
        ts.server().reset();
        assert_eq!(queue_urls(&ts).await, 0);
    }

    #[tokio::test]
    async fn test_should_route_to_replacement_mock_immediately() {
        let ts = TestServer::start().await;
        ts.json_call("1.0", "AmazonSQS.CreateQueue", json!({ "QueueName": "old" }))
            .await;
        assert_eq!(queue_urls(&ts).await, 1);

        let replaced = ts
            .server()
            .registry()
            .register(mockstack_services::sqs::mock(&ResourceScope::default()));
        assert!(replaced.is_some());
        assert_eq!(queue_urls(&ts).await, 0);
    }

    #[tokio::test]
    async fn test_should_isolate_concurrent_servers() {
        let first = TestServer::start().await;
        let second = TestServer::start().await;
        first
            .json_call("1.0", "AmazonSQS.CreateQueue", json!({ "QueueName": "only-here" }))
            .await;
        assert_eq!(queue_urls(&first).await, 1);
        assert_eq!(queue_urls(&second).await, 0);
    }
}
