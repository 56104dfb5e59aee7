//! Queue lifecycle over `awsJson1_0`.

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::{Value, json};

    use crate::TestServer;

    async fn sqs(ts: &TestServer, op: &str, body: Value) -> (StatusCode, Value) {
        ts.json_call("1.0", &format!("AmazonSQS.{op}"), body).await
    }

    fn message_count(body: &Value) -> usize {
        body["Messages"].as_array().map_or(0, Vec::len)
    }

    #[tokio::test]
    async fn test_should_send_receive_and_delete_message() {
        let ts = TestServer::start().await;

        let (status, body) = sqs(&ts, "CreateQueue", json!({ "QueueName": "jobs" })).await;
        assert_eq!(status, StatusCode::OK);
        let url = body["QueueUrl"].as_str().unwrap().to_owned();
        assert!(url.ends_with("/000000000000/jobs"), "{url}");

        let (status, _) = sqs(
            &ts,
            "SendMessage",
            json!({ "QueueUrl": url, "MessageBody": "hello world" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = sqs(
            &ts,
            "ReceiveMessage",
            json!({ "QueueUrl": url, "MaxNumberOfMessages": 1 }),
        )
        .await;
        assert_eq!(message_count(&body), 1);
        let message = &body["Messages"][0];
        assert_eq!(message["Body"], "hello world");
        let handle = message["ReceiptHandle"].as_str().unwrap().to_owned();

        let (status, _) = sqs(
            &ts,
            "DeleteMessage",
            json!({ "QueueUrl": url, "ReceiptHandle": handle }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = sqs(
            &ts,
            "ReceiveMessage",
            json!({ "QueueUrl": url, "MaxNumberOfMessages": 1 }),
        )
        .await;
        assert_eq!(message_count(&body), 0);

        ts.stop().await;
    }

    #[tokio::test]
    async fn test_should_report_missing_queue_with_json_error() {
        let ts = TestServer::start().await;
        let (status, body) = sqs(&ts, "GetQueueUrl", json!({ "QueueName": "ghost" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let kind = body["__type"].as_str().unwrap();
        assert!(kind.ends_with("QueueDoesNotExist"), "{kind}");
    }

    #[tokio::test]
    async fn test_should_remove_messages_with_their_queue() {
        let ts = TestServer::start().await;
        let (_, body) = sqs(&ts, "CreateQueue", json!({ "QueueName": "short-lived" })).await;
        let url = body["QueueUrl"].as_str().unwrap().to_owned();
        sqs(&ts, "SendMessage", json!({ "QueueUrl": url, "MessageBody": "x" })).await;

        let (status, _) = sqs(&ts, "DeleteQueue", json!({ "QueueUrl": url })).await;
        assert_eq!(status, StatusCode::OK);

        sqs(&ts, "CreateQueue", json!({ "QueueName": "short-lived" })).await;
        let (_, body) = sqs(&ts, "ReceiveMessage", json!({ "QueueUrl": url })).await;
        assert_eq!(message_count(&body), 0);
    }

    #[tokio::test]
    async fn test_should_reject_out_of_range_timing_values() {
        let ts = TestServer::start().await;
        let (_, body) = sqs(&ts, "CreateQueue", json!({ "QueueName": "timed" })).await;
        let url = body["QueueUrl"].as_str().unwrap().to_owned();

        let (status, body) = sqs(
            &ts,
            "SendMessage",
            json!({ "QueueUrl": url, "MessageBody": "m", "DelaySeconds": -1 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let kind = body["__type"].as_str().unwrap();
        assert!(kind.ends_with("InvalidParameterValue"), "{kind}");

        let (status, body) = sqs(
            &ts,
            "ReceiveMessage",
            json!({ "QueueUrl": url, "VisibilityTimeout": 9_223_372_036_854_775_807_i64 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["__type"].as_str().unwrap().ends_with("InvalidParameterValue"));

        let (status, _) = sqs(&ts, "ReceiveMessage", json!({ "QueueUrl": url })).await;
        assert_eq!(status, StatusCode::OK);
    }
}
