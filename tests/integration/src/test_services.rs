//! One round trip per remaining dialect, routed through the gateway.

#[cfg(test)]
mod tests {
    use mockstack_core::Params;
    use mockstack_protocol::cbor::{decode_map, encode_map};
    use reqwest::{Method, StatusCode};
    use serde_json::json;

    use crate::{TestServer, authorization};

    #[tokio::test]
    async fn test_should_store_item_in_table() {
        let ts = TestServer::start().await;
        let (status, _) = ts
            .json_call(
                "1.0",
                "DynamoDB_20120810.CreateTable",
                json!({
                    "TableName": "users",
                    "KeySchema": [{"AttributeName": "pk", "KeyType": "HASH"}],
                    "AttributeDefinitions": [{"AttributeName": "pk", "AttributeType": "S"}],
                    "BillingMode": "PAY_PER_REQUEST",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        ts.json_call(
            "1.0",
            "DynamoDB_20120810.PutItem",
            json!({"TableName": "users", "Item": {"pk": {"S": "u1"}, "name": {"S": "Ada"}}}),
        )
        .await;
        let (_, body) = ts
            .json_call(
                "1.0",
                "DynamoDB_20120810.GetItem",
                json!({"TableName": "users", "Key": {"pk": {"S": "u1"}}}),
            )
            .await;
        assert_eq!(body["Item"]["name"]["S"], "Ada");
    }

    #[tokio::test]
    async fn test_should_create_topic_over_query_protocol() {
        let ts = TestServer::start().await;
        let (status, xml) = ts
            .query("sns", &[("Action", "CreateTopic"), ("Version", "2010-03-31"), ("Name", "orders")])
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(xml.contains("<TopicArn>arn:aws:sns:us-east-1:000000000000:orders</TopicArn>"));

        let (_, xml) = ts.query("sns", &[("Action", "ListTopics")]).await;
        assert!(xml.contains("arn:aws:sns:us-east-1:000000000000:orders"));
    }

    #[tokio::test]
    async fn test_should_put_record_on_stream() {
        let ts = TestServer::start().await;
        let (status, _) = ts
            .json_call(
                "1.1",
                "Kinesis_20131202.CreateStream",
                json!({"StreamName": "clicks", "ShardCount": 1}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = ts
            .json_call(
                "1.1",
                "Kinesis_20131202.PutRecord",
                json!({"StreamName": "clicks", "PartitionKey": "user-1", "Data": "aGVsbG8="}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ShardId"], "shardId-000000000000");
        assert!(body["SequenceNumber"].is_string());
    }

    #[tokio::test]
    async fn test_should_read_back_secret_value() {
        let ts = TestServer::start().await;
        let (status, created) = ts
            .json_call(
                "1.1",
                "secretsmanager.CreateSecret",
                json!({"Name": "db/password", "SecretString": "hunter2"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(created["ARN"].as_str().unwrap().contains(":secret:db/password-"));

        let (_, body) = ts
            .json_call(
                "1.1",
                "secretsmanager.GetSecretValue",
                json!({"SecretId": "db/password"}),
            )
            .await;
        assert_eq!(body["SecretString"], "hunter2");
        assert_eq!(body["VersionStages"], json!(["AWSCURRENT"]));
    }

    #[tokio::test]
    async fn test_should_manage_http_api_over_rest_json() {
        let ts = TestServer::start().await;
        let resp = ts
            .request(Method::POST, "/v2/apis")
            .header("authorization", authorization("apigateway"))
            .header("content-type", "application/json")
            .body(json!({"name": "shop", "protocolType": "HTTP"}).to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let api: serde_json::Value = resp.json().await.unwrap();
        let id = api["apiId"].as_str().unwrap().to_owned();

        let resp = ts
            .request(Method::GET, &format!("/v2/apis/{id}"))
            .header("authorization", authorization("apigateway"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let api: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(api["name"], "shop");

        let resp = ts
            .request(Method::GET, "/v2/apis/missing")
            .header("authorization", authorization("apigateway"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_should_describe_alarm_over_cbor() {
        let ts = TestServer::start().await;
        let send = |op: &str, params: &Params| {
            ts.request(
                Method::POST,
                &format!("/service/GraniteServiceVersion20100801/operation/{op}"),
            )
            .header("authorization", authorization("monitoring"))
            .header("content-type", "application/cbor")
            .header("smithy-protocol", "rpc-v2-cbor")
            .body(encode_map(params))
            .send()
        };

        let alarm = Params::new()
            .with("AlarmName", "cpu-high")
            .with("MetricName", "CPUUtilization")
            .with("Namespace", "AWS/EC2")
            .with("Statistic", "Average")
            .with("Period", 60)
            .with("EvaluationPeriods", 2)
            .with("Threshold", 80.0)
            .with("ComparisonOperator", "GreaterThanThreshold");
        let resp = send("PutMetricAlarm", &alarm).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = send("DescribeAlarms", &Params::new()).await.unwrap();
        assert_eq!(resp.headers().get("smithy-protocol").unwrap(), "rpc-v2-cbor");
        let out = decode_map(&resp.bytes().await.unwrap()).unwrap();
        let alarms = out.list("MetricAlarms").unwrap();
        assert_eq!(alarms.len(), 1);
        let alarm = alarms[0].as_map().unwrap();
        assert_eq!(alarm.str("AlarmName"), Some("cpu-high"));
        assert_eq!(alarm.str("StateValue"), Some("INSUFFICIENT_DATA"));
    }
}
