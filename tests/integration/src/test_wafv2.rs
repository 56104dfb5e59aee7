//! Optimistic locking of web ACLs over `awsJson1_1`.

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::{Value, json};

    use crate::TestServer;

    async fn waf(ts: &TestServer, op: &str, body: Value) -> (StatusCode, Value) {
        ts.json_call("1.1", &format!("AWSWAF_20190729.{op}"), body).await
    }

    async fn listed_names(ts: &TestServer) -> Vec<String> {
        let (_, body) = waf(ts, "ListWebACLs", json!({ "Scope": "REGIONAL" })).await;
        body["WebACLs"]
            .as_array()
            .map(|acls| {
                acls.iter()
                    .filter_map(|acl| acl["Name"].as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn create_body(name: &str) -> Value {
        json!({
            "Name": name,
            "Scope": "REGIONAL",
            "DefaultAction": { "Allow": {} },
            "VisibilityConfig": {
                "SampledRequestsEnabled": false,
                "CloudWatchMetricsEnabled": false,
                "MetricName": name,
            },
        })
    }

    #[tokio::test]
    async fn test_should_delete_only_with_current_lock_token() {
        let ts = TestServer::start().await;

        let (status, body) = waf(&ts, "CreateWebACL", create_body("edge")).await;
        assert_eq!(status, StatusCode::OK);
        let id = body["Summary"]["Id"].as_str().unwrap().to_owned();
        let token = body["Summary"]["LockToken"].as_str().unwrap().to_owned();

        let addressed = |lock: &str| {
            json!({ "Name": "edge", "Scope": "REGIONAL", "Id": id, "LockToken": lock })
        };

        let (status, body) = waf(&ts, "DeleteWebACL", addressed("stale-token")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let kind = body["__type"].as_str().unwrap();
        assert!(kind.ends_with("#WAFOptimisticLockException"), "{kind}");
        assert_eq!(listed_names(&ts).await, vec!["edge"]);

        let (status, _) = waf(&ts, "DeleteWebACL", addressed(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(listed_names(&ts).await.is_empty());

        ts.stop().await;
    }

    #[tokio::test]
    async fn test_should_rotate_lock_token_on_update() {
        let ts = TestServer::start().await;
        let (_, body) = waf(&ts, "CreateWebACL", create_body("rotating")).await;
        let id = body["Summary"]["Id"].as_str().unwrap().to_owned();
        let first = body["Summary"]["LockToken"].as_str().unwrap().to_owned();

        let mut update = create_body("rotating");
        update["Id"] = json!(id);
        update["LockToken"] = json!(first);
        let (status, body) = waf(&ts, "UpdateWebACL", update.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let next = body["NextLockToken"].as_str().unwrap().to_owned();
        assert_ne!(next, first);

        let (status, _) = waf(&ts, "UpdateWebACL", update).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_should_reject_duplicate_name_in_scope() {
        let ts = TestServer::start().await;
        waf(&ts, "CreateWebACL", create_body("dup")).await;
        let (status, body) = waf(&ts, "CreateWebACL", create_body("dup")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["__type"]
                .as_str()
                .unwrap()
                .ends_with("#WAFDuplicateItemException")
        );
    }
}
