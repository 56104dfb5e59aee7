//! Object storage over the gateway.

#[cfg(test)]
mod tests {
    use reqwest::{Method, StatusCode};

    use crate::TestServer;

    fn bucket_count(xml: &str) -> usize {
        xml.matches("<Bucket>").count()
    }

    #[tokio::test]
    async fn test_should_create_list_and_delete_bucket() {
        let ts = TestServer::start().await;

        let (status, _) = ts.s3(Method::PUT, "/test-bucket", "").await;
        assert_eq!(status, StatusCode::OK);

        let (status, xml) = ts.s3(Method::GET, "/", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(xml.contains("<Name>test-bucket</Name>"), "{xml}");
        assert_eq!(bucket_count(&xml), 1);

        let (status, _) = ts.s3(Method::DELETE, "/test-bucket", "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, xml) = ts.s3(Method::GET, "/", "").await;
        assert_eq!(bucket_count(&xml), 0);

        ts.stop().await;
    }

    #[tokio::test]
    async fn test_should_route_unsigned_requests_to_object_storage() {
        let ts = TestServer::start().await;
        let resp = ts
            .request(Method::PUT, "/fallback-bucket")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let (_, xml) = ts.s3(Method::GET, "/", "").await;
        assert!(xml.contains("<Name>fallback-bucket</Name>"));
    }

    #[tokio::test]
    async fn test_should_round_trip_object_body() {
        let ts = TestServer::start().await;
        ts.s3(Method::PUT, "/docs", "").await;

        let (status, _) = ts.s3(Method::PUT, "/docs/notes/today.txt", "hello").await;
        assert_eq!(status, StatusCode::OK);

        let resp = ts
            .request(Method::GET, "/docs/notes/today.txt")
            .header("authorization", crate::authorization("s3"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("etag").unwrap(),
            "\"5d41402abc4b2a76b9719d911017c592\""
        );
        assert_eq!(resp.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_should_refuse_to_delete_bucket_with_objects() {
        let ts = TestServer::start().await;
        ts.s3(Method::PUT, "/full", "").await;
        ts.s3(Method::PUT, "/full/k", "v").await;

        let (status, xml) = ts.s3(Method::DELETE, "/full", "").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(xml.contains("<Code>BucketNotEmpty</Code>"));

        ts.s3(Method::DELETE, "/full/k", "").await;
        let (status, _) = ts.s3(Method::DELETE, "/full", "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_should_report_missing_bucket_as_xml_error() {
        let ts = TestServer::start().await;
        let (status, xml) = ts.s3(Method::GET, "/nowhere/key", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(xml.contains("<Code>NoSuchBucket</Code>"));
    }
}
