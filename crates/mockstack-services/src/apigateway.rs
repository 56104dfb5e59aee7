//! HTTP and WebSocket APIs over `restJson1` (`/v2/apis/...`).
//!
//! Routes and stages are nested in their API record, so `DeleteApi` takes
//! them with it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::{Method, StatusCode};
use mockstack_core::{ListOrder, Params, Resource, ResourceScope, ResourceStore, Value, ids};
use mockstack_protocol::{
    Call, ErrorCodes, Output, Payload, ProtocolMock, Provider, RestJsonCodec, Route, RouteTable,
    ServiceError,
};
use tracing::info;

const ID_LEN: usize = 10;
const ROUTE_ID_LEN: usize = 7;
const DEFAULT_ROUTE_SELECTION: &str = "$request.method $request.path";
const DEFAULT_PAGE_SIZE: i64 = 100;

static ERROR_CODES: ErrorCodes = ErrorCodes {
    validation: "BadRequestException",
    not_found: "NotFoundException",
    already_exists: "ConflictException",
    not_found_status: StatusCode::NOT_FOUND,
    conflict_status: StatusCode::CONFLICT,
    ..ErrorCodes::DEFAULT
};

/// A route of an API.
#[derive(Debug, Clone)]
pub struct ApiRoute {
    /// Route id.
    pub id: String,
    /// Route key, e.g. `GET /pets` or `$default`.
    pub route_key: String,
    /// Integration target, if any.
    pub target: Option<String>,
    /// Authorization type.
    pub authorization_type: String,
}

impl ApiRoute {
    fn to_params(&self) -> Params {
        Params::new()
            .with("routeId", self.id.as_str())
            .with("routeKey", self.route_key.as_str())
            .with("target", self.target.as_deref())
            .with("authorizationType", self.authorization_type.as_str())
            .with("apiKeyRequired", false)
    }
}

/// A deployment stage of an API.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Stage name, unique within the API.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Whether changes deploy automatically.
    pub auto_deploy: bool,
    /// Stage variables.
    pub variables: BTreeMap<String, String>,
    /// Creation time.
    pub created: DateTime<Utc>,
}

impl Stage {
    fn to_params(&self) -> Params {
        Params::new()
            .with("stageName", self.name.as_str())
            .with("description", self.description.as_deref())
            .with("autoDeploy", self.auto_deploy)
            .with("stageVariables", Params::from(self.variables.clone()))
            .with("createdDate", self.created)
            .with("lastUpdatedDate", self.created)
    }
}

/// An API with its routes and stages.
#[derive(Debug, Clone)]
pub struct Api {
    /// Generated id; also the store id.
    pub id: String,
    /// Name (not unique).
    pub name: String,
    /// `HTTP` or `WEBSOCKET`.
    pub protocol_type: String,
    /// Description.
    pub description: Option<String>,
    /// Route selection expression.
    pub route_selection_expression: String,
    /// Invoke endpoint.
    pub endpoint: String,
    /// Tags.
    pub tags: BTreeMap<String, String>,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Routes in creation order.
    pub routes: Vec<ApiRoute>,
    /// Stages, by name.
    pub stages: BTreeMap<String, Stage>,
}

impl Resource for Api {
    const KIND: &'static str = "Api";
    const ORDER: ListOrder = ListOrder::Creation;

    fn name(&self) -> &str {
        &self.name
    }
}

impl Api {
    fn to_params(&self) -> Params {
        Params::new()
            .with("apiId", self.id.as_str())
            .with("name", self.name.as_str())
            .with("protocolType", self.protocol_type.as_str())
            .with("description", self.description.as_deref())
            .with("routeSelectionExpression", self.route_selection_expression.as_str())
            .with("apiEndpoint", self.endpoint.as_str())
            .with("apiKeySelectionExpression", "$request.header.x-api-key")
            .with("disableExecuteApiEndpoint", false)
            .with("tags", Params::from(self.tags.clone()))
            .with("createdDate", self.created)
    }
}

fn items(values: Vec<Value>) -> Params {
    Params::new().with("items", values)
}

fn validate_protocol(protocol: &str) -> Result<(), ServiceError> {
    match protocol {
        "HTTP" | "WEBSOCKET" => Ok(()),
        other => Err(ServiceError::validation(format!(
            "Invalid protocolType {other}, must be HTTP or WEBSOCKET"
        ))),
    }
}

/// The API Gateway v2 provider.
#[derive(Debug)]
pub struct ApiGatewayProvider {
    apis: ResourceStore<Api>,
    scope: ResourceScope,
}

impl ApiGatewayProvider {
    /// Create a provider with no APIs.
    #[must_use]
    pub fn new(scope: ResourceScope) -> Self {
        Self {
            apis: ResourceStore::new().allow_duplicate_names(),
            scope,
        }
    }

    /// Handle `CreateApi`.
    fn handle_create_api(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("name")?;
        let protocol_type = params.require_str("protocolType")?;
        validate_protocol(protocol_type)?;

        let id = ids::random_alnum_lower(ID_LEN);
        let endpoint = match protocol_type {
            "WEBSOCKET" => format!("wss://{id}.execute-api.{}.amazonaws.com", self.scope.region),
            _ => format!("https://{id}.execute-api.{}.amazonaws.com", self.scope.region),
        };
        let api = Api {
            id: id.clone(),
            name: name.to_owned(),
            protocol_type: protocol_type.to_owned(),
            description: params.str("description").map(str::to_owned),
            route_selection_expression: params
                .str("routeSelectionExpression")
                .unwrap_or(DEFAULT_ROUTE_SELECTION)
                .to_owned(),
            endpoint,
            tags: params.string_map("tags")?,
            created: Utc::now(),
            routes: Vec::new(),
            stages: BTreeMap::new(),
        };
        let record = self.apis.create(id.as_str(), api)?;
        info!(api = %name, id = %id, "created API");
        Ok(record.value.to_params())
    }

    /// Handle `GetApi`.
    fn handle_get_api(&self, params: &Params) -> Result<Params, ServiceError> {
        let id = params.require_str("apiId")?;
        Ok(self.apis.inspect(id, |r| r.value.to_params())?)
    }

    /// Handle `GetApis`.
    fn handle_get_apis(&self, params: &Params) -> Result<Params, ServiceError> {
        let max = params.i64_or("maxResults", DEFAULT_PAGE_SIZE)?.max(1);
        let page = self.apis.page(
            |_| true,
            usize::try_from(max).unwrap_or(1),
            params.str("nextToken"),
        )?;
        let apis: Vec<Value> = page.items.iter().map(|r| r.value.to_params().into()).collect();
        Ok(items(apis).with("nextToken", page.next_token))
    }

    /// Handle `UpdateApi`.
    fn handle_update_api(&self, params: &Params) -> Result<Params, ServiceError> {
        let id = params.require_str("apiId")?;
        let mutation = self.apis.update(id, None, |api: &mut Api| {
            if let Some(name) = params.str("name") {
                api.name = name.to_owned();
            }
            if let Some(description) = params.str("description") {
                api.description = Some(description.to_owned());
            }
            if let Some(expression) = params.str("routeSelectionExpression") {
                api.route_selection_expression = expression.to_owned();
            }
            Ok::<_, ServiceError>(api.to_params())
        })?;
        Ok(mutation.output)
    }

    /// Handle `DeleteApi`.
    fn handle_delete_api(&self, params: &Params) -> Result<Params, ServiceError> {
        let id = params.require_str("apiId")?;
        let removed = self.apis.delete(id, None)?;
        info!(
            api = %removed.value.name,
            id = %id,
            routes = removed.value.routes.len(),
            stages = removed.value.stages.len(),
            "deleted API"
        );
        Ok(Params::new())
    }

    /// Handle `CreateRoute`.
    fn handle_create_route(&self, params: &Params) -> Result<Params, ServiceError> {
        let api_id = params.require_str("apiId")?;
        let route_key = params.require_str("routeKey")?;
        let route = ApiRoute {
            id: ids::random_alnum_lower(ROUTE_ID_LEN),
            route_key: route_key.to_owned(),
            target: params.str("target").map(str::to_owned),
            authorization_type: params.str("authorizationType").unwrap_or("NONE").to_owned(),
        };
        let mutation = self.apis.update(api_id, None, |api: &mut Api| {
            if api.routes.iter().any(|r| r.route_key == route_key) {
                return Err(ServiceError::already_exists(format!(
                    "Route with key {route_key} already exists for this API"
                )));
            }
            let out = route.to_params();
            api.routes.push(route);
            Ok(out)
        })?;
        Ok(mutation.output)
    }

    /// Handle `GetRoute`.
    fn handle_get_route(&self, params: &Params) -> Result<Params, ServiceError> {
        let api_id = params.require_str("apiId")?;
        let route_id = params.require_str("routeId")?;
        self.apis.inspect(api_id, |r| {
            r.value
                .routes
                .iter()
                .find(|route| route.id == route_id)
                .map(ApiRoute::to_params)
                .ok_or_else(|| ServiceError::not_found(format!("Invalid Route identifier specified {route_id}")))
        })?
    }

    /// Handle `GetRoutes`.
    fn handle_get_routes(&self, params: &Params) -> Result<Params, ServiceError> {
        let api_id = params.require_str("apiId")?;
        let routes = self.apis.inspect(api_id, |r| {
            r.value
                .routes
                .iter()
                .map(|route| route.to_params().into())
                .collect::<Vec<Value>>()
        })?;
        Ok(items(routes))
    }

    /// Handle `DeleteRoute`.
    fn handle_delete_route(&self, params: &Params) -> Result<Params, ServiceError> {
        let api_id = params.require_str("apiId")?;
        let route_id = params.require_str("routeId")?;
        self.apis.update(api_id, None, |api: &mut Api| {
            let before = api.routes.len();
            api.routes.retain(|r| r.id != route_id);
            if api.routes.len() == before {
                return Err(ServiceError::not_found(format!(
                    "Invalid Route identifier specified {route_id}"
                )));
            }
            Ok(())
        })?;
        Ok(Params::new())
    }

    /// Handle `CreateStage`.
    fn handle_create_stage(&self, params: &Params) -> Result<Params, ServiceError> {
        let api_id = params.require_str("apiId")?;
        let stage_name = params.require_str("stageName")?;
        let stage = Stage {
            name: stage_name.to_owned(),
            description: params.str("description").map(str::to_owned),
            auto_deploy: params.bool_or("autoDeploy", false)?,
            variables: params.string_map("stageVariables")?,
            created: Utc::now(),
        };
        let mutation = self.apis.update(api_id, None, |api: &mut Api| {
            if api.stages.contains_key(stage_name) {
                return Err(ServiceError::already_exists(format!(
                    "Stage already exists: {stage_name}"
                )));
            }
            let out = stage.to_params();
            api.stages.insert(stage_name.to_owned(), stage);
            Ok(out)
        })?;
        Ok(mutation.output)
    }

    /// Handle `GetStage`.
    fn handle_get_stage(&self, params: &Params) -> Result<Params, ServiceError> {
        let api_id = params.require_str("apiId")?;
        let stage_name = params.require_str("stageName")?;
        self.apis.inspect(api_id, |r| {
            r.value
                .stages
                .get(stage_name)
                .map(Stage::to_params)
                .ok_or_else(|| ServiceError::not_found(format!("Invalid stage identifier specified {stage_name}")))
        })?
    }

    /// Handle `GetStages`.
    fn handle_get_stages(&self, params: &Params) -> Result<Params, ServiceError> {
        let api_id = params.require_str("apiId")?;
        let stages = self.apis.inspect(api_id, |r| {
            r.value
                .stages
                .values()
                .map(|stage| stage.to_params().into())
                .collect::<Vec<Value>>()
        })?;
        Ok(items(stages))
    }

    /// Handle `DeleteStage`.
    fn handle_delete_stage(&self, params: &Params) -> Result<Params, ServiceError> {
        let api_id = params.require_str("apiId")?;
        let stage_name = params.require_str("stageName")?;
        self.apis.update(api_id, None, |api: &mut Api| {
            api.stages.remove(stage_name).map(|_| ()).ok_or_else(|| {
                ServiceError::not_found(format!("Invalid stage identifier specified {stage_name}"))
            })
        })?;
        Ok(Params::new())
    }
}

impl Provider for ApiGatewayProvider {
    fn name(&self) -> &'static str {
        "apigateway"
    }

    fn error_codes(&self) -> &'static ErrorCodes {
        &ERROR_CODES
    }

    fn dispatch(&self, call: Call) -> Result<Output, ServiceError> {
        let params = &call.params;
        let result = match call.operation.as_str() {
            "CreateApi" => self.handle_create_api(params),
            "GetApi" => self.handle_get_api(params),
            "GetApis" => self.handle_get_apis(params),
            "UpdateApi" => self.handle_update_api(params),
            "DeleteApi" => self.handle_delete_api(params),
            "CreateRoute" => self.handle_create_route(params),
            "GetRoute" => self.handle_get_route(params),
            "GetRoutes" => self.handle_get_routes(params),
            "DeleteRoute" => self.handle_delete_route(params),
            "CreateStage" => self.handle_create_stage(params),
            "GetStage" => self.handle_get_stage(params),
            "GetStages" => self.handle_get_stages(params),
            "DeleteStage" => self.handle_delete_stage(params),
            other => Err(ServiceError::unsupported_operation(other)),
        };
        result.map(Output::new)
    }

    fn reset(&self) {
        self.apis.reset();
    }
}

fn routes() -> RouteTable {
    use Method as M;
    const APIS: &str = "/v2/apis";
    const API: &str = "/v2/apis/{apiId}";
    const ROUTES: &str = "/v2/apis/{apiId}/routes";
    const ROUTE: &str = "/v2/apis/{apiId}/routes/{routeId}";
    const STAGES: &str = "/v2/apis/{apiId}/stages";
    const STAGE: &str = "/v2/apis/{apiId}/stages/{stageName}";

    RouteTable::new(vec![
        Route::new(M::POST, APIS, "CreateApi")
            .with_payload(Payload::Structure)
            .with_status(StatusCode::CREATED),
        Route::new(M::GET, APIS, "GetApis"),
        Route::new(M::GET, API, "GetApi"),
        Route::new(M::PATCH, API, "UpdateApi").with_payload(Payload::Structure),
        Route::new(M::DELETE, API, "DeleteApi").with_status(StatusCode::NO_CONTENT),
        Route::new(M::POST, ROUTES, "CreateRoute")
            .with_payload(Payload::Structure)
            .with_status(StatusCode::CREATED),
        Route::new(M::GET, ROUTES, "GetRoutes"),
        Route::new(M::GET, ROUTE, "GetRoute"),
        Route::new(M::DELETE, ROUTE, "DeleteRoute").with_status(StatusCode::NO_CONTENT),
        Route::new(M::POST, STAGES, "CreateStage")
            .with_payload(Payload::Structure)
            .with_status(StatusCode::CREATED),
        Route::new(M::GET, STAGES, "GetStages"),
        Route::new(M::GET, STAGE, "GetStage"),
        Route::new(M::DELETE, STAGE, "DeleteStage").with_status(StatusCode::NO_CONTENT),
    ])
}

/// The API Gateway v2 service mock.
#[must_use]
pub fn mock(scope: &ResourceScope) -> Arc<ProtocolMock<ApiGatewayProvider>> {
    Arc::new(ProtocolMock::new(
        ApiGatewayProvider::new(scope.clone()),
        RestJsonCodec::new(routes()),
    ))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use mockstack_protocol::ServiceMock;

    use super::*;

    fn request(method: Method, path: &str, body: &str) -> http::Request<Bytes> {
        http::Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Bytes::from(body.to_owned()))
            .unwrap()
    }

    fn json(resp: &http::Response<Bytes>) -> serde_json::Value {
        serde_json::from_slice(resp.body()).unwrap()
    }

    fn create_api(gw: &ProtocolMock<ApiGatewayProvider>, name: &str) -> String {
        let resp = gw.handle(request(
            Method::POST,
            "/v2/apis",
            &format!(r#"{{"name":"{name}","protocolType":"HTTP"}}"#),
        ));
        assert_eq!(resp.status(), StatusCode::CREATED);
        json(&resp)["apiId"].as_str().unwrap().to_owned()
    }

    #[test]
    fn test_should_create_and_get_api() {
        let gw = mock(&ResourceScope::default());
        let id = create_api(&gw, "pets");
        assert_eq!(id.len(), ID_LEN);

        let resp = gw.handle(request(Method::GET, &format!("/v2/apis/{id}"), ""));
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(&resp);
        assert_eq!(body["name"], "pets");
        assert_eq!(
            body["apiEndpoint"],
            format!("https://{id}.execute-api.us-east-1.amazonaws.com")
        );
    }

    #[test]
    fn test_should_return_not_found_with_error_type_header() {
        let gw = mock(&ResourceScope::default());
        let resp = gw.handle(request(Method::GET, "/v2/apis/missing", ""));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers().get("x-amzn-errortype").unwrap(), "NotFoundException");
    }

    #[test]
    fn test_should_reject_duplicate_stage_with_conflict() {
        let gw = mock(&ResourceScope::default());
        let id = create_api(&gw, "staged");
        let path = format!("/v2/apis/{id}/stages");
        let resp = gw.handle(request(Method::POST, &path, r#"{"stageName":"prod"}"#));
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = gw.handle(request(Method::POST, &path, r#"{"stageName":"prod"}"#));
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(resp.headers().get("x-amzn-errortype").unwrap(), "ConflictException");

        let resp = gw.handle(request(Method::GET, &path, ""));
        assert_eq!(json(&resp)["items"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_should_create_and_delete_routes() {
        let gw = mock(&ResourceScope::default());
        let id = create_api(&gw, "routed");
        let path = format!("/v2/apis/{id}/routes");
        let resp = gw.handle(request(Method::POST, &path, r#"{"routeKey":"GET /pets"}"#));
        assert_eq!(resp.status(), StatusCode::CREATED);
        let route_id = json(&resp)["routeId"].as_str().unwrap().to_owned();

        let resp = gw.handle(request(Method::DELETE, &format!("{path}/{route_id}"), ""));
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(resp.body().is_empty());

        let resp = gw.handle(request(Method::GET, &path, ""));
        assert!(json(&resp)["items"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_should_discard_nested_state_with_api() {
        let gw = mock(&ResourceScope::default());
        let id = create_api(&gw, "doomed");
        gw.handle(request(
            Method::POST,
            &format!("/v2/apis/{id}/stages"),
            r#"{"stageName":"dev"}"#,
        ));
        let resp = gw.handle(request(Method::DELETE, &format!("/v2/apis/{id}"), ""));
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = gw.handle(request(Method::GET, &format!("/v2/apis/{id}/stages"), ""));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = gw.handle(request(Method::GET, "/v2/apis", ""));
        assert!(json(&resp)["items"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_should_patch_api_name() {
        let gw = mock(&ResourceScope::default());
        let id = create_api(&gw, "before");
        let resp = gw.handle(request(
            Method::PATCH,
            &format!("/v2/apis/{id}"),
            r#"{"name":"after"}"#,
        ));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(&resp)["name"], "after");
    }
}
