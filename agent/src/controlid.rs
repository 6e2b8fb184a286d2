//! HTTP client for a Control ID face reader
//!
//! The reader speaks JSON over plain HTTP on the LAN. Most endpoints need a
//! `session` query parameter obtained from `/login.fcgi`; the session is
//! cached and re-acquired once when the reader answers 401.

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;

use gym_bridge_protocol::payloads::{EnrollFace, DEFAULT_GROUP_ID};

use crate::error::DeviceError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const LONG_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Latest end time the reader accepts (`i32::MAX`): no expiry
const NO_EXPIRY: i64 = 2_147_483_647;

/// Object collections exposed by `/load_objects.fcgi`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderObject {
    Users,
    Groups,
    UserGroups,
    AccessLogs,
}

impl ReaderObject {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReaderObject::Users => "users",
            ReaderObject::Groups => "groups",
            ReaderObject::UserGroups => "user_groups",
            ReaderObject::AccessLogs => "access_logs",
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    session: String,
}

#[derive(Debug, Deserialize)]
struct CreatedIds {
    #[serde(default)]
    ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct UserGroupLink {
    user_id: i64,
    group_id: i64,
}

pub struct ControlIdClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    session: RwLock<Option<String>>,
}

impl ControlIdClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            session: RwLock::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Open a new session and cache it
    pub async fn login(&self) -> Result<String, DeviceError> {
        tracing::info!("Logging in to reader {}", self.base_url);
        let response = self
            .http
            .post(self.url("/login.fcgi"))
            .json(&json!({"login": self.username, "password": self.password}))
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await
            .map_err(|e| DeviceError::from_reqwest(&self.base_url, e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(DeviceError::AuthRejected(self.base_url.clone()));
        }
        let login: LoginResponse = self.decode(response).await?;

        *self.session.write().await = Some(login.session.clone());
        Ok(login.session)
    }

    async fn current_session(&self) -> Result<String, DeviceError> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }
        self.login().await
    }

    /// Whether the reader's web server answers at all
    pub async fn check_status(&self) -> bool {
        match self
            .http
            .get(self.url("/"))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!("Reader {} offline: {}", self.base_url, e);
                false
            }
        }
    }

    /// Send a session-authenticated request, logging in again once on 401
    async fn send_with_session<F>(
        &self,
        timeout: Duration,
        build: F,
    ) -> Result<reqwest::Response, DeviceError>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let mut relogged = false;
        loop {
            let session = self.current_session().await?;
            let response = build(&session)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| DeviceError::from_reqwest(&self.base_url, e))?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            if relogged {
                return Err(DeviceError::AuthRejected(self.base_url.clone()));
            }

            tracing::info!("Reader {} session expired, logging in again", self.base_url);
            *self.session.write().await = None;
            relogged = true;
        }
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T, DeviceError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DeviceError::from_reqwest(&self.base_url, e))?;

        if !status.is_success() {
            return Err(DeviceError::Status(status.as_u16(), body));
        }
        serde_json::from_str(&body).map_err(|e| DeviceError::Malformed(format!("{}: {}", e, body)))
    }

    /// POST JSON to a `?session=` endpoint and decode the answer
    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T, DeviceError> {
        let url = self.url(path);
        let response = self
            .send_with_session(timeout, |session| {
                self.http
                    .post(&url)
                    .query(&[("session", session)])
                    .json(body)
            })
            .await?;
        self.decode(response).await
    }

    /// GET a `?session=` endpoint with extra query parameters
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DeviceError> {
        let url = self.url(path);
        let response = self
            .send_with_session(DEFAULT_TIMEOUT, |session| {
                self.http
                    .request(Method::GET, &url)
                    .query(query)
                    .query(&[("session", session)])
            })
            .await?;
        self.decode(response).await
    }

    pub async fn system_information(&self) -> Result<Value, DeviceError> {
        self.call("/system_information.fcgi", &json!({}), DEFAULT_TIMEOUT)
            .await
    }

    /// Every row of one object collection
    pub async fn load_objects(&self, object: ReaderObject) -> Result<Vec<Value>, DeviceError> {
        let mut body: Value = self
            .call(
                "/load_objects.fcgi",
                &json!({"object": object.as_str()}),
                DEFAULT_TIMEOUT,
            )
            .await?;

        match body.get_mut(object.as_str()).map(Value::take) {
            Some(Value::Array(rows)) => Ok(rows),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(other) => Err(DeviceError::Malformed(format!(
                "{} is not a list: {}",
                object.as_str(),
                other
            ))),
        }
    }

    /// Create a user without expiry and link it to `group_id` (default group when `None`)
    ///
    /// A failed group link is logged, not returned: the user exists either way.
    pub async fn create_user(
        &self,
        name: &str,
        registration: &str,
        group_id: Option<i64>,
    ) -> Result<i64, DeviceError> {
        tracing::info!("Creating user {} ({}) on {}", name, registration, self.base_url);
        let created: CreatedIds = self
            .call(
                "/create_objects.fcgi",
                &json!({
                    "object": "users",
                    "values": [{
                        "name": name,
                        "registration": registration,
                        "begin_time": 0,
                        "end_time": NO_EXPIRY,
                    }]
                }),
                DEFAULT_TIMEOUT,
            )
            .await?;

        let user_id = created
            .ids
            .first()
            .copied()
            .ok_or_else(|| DeviceError::Malformed("create_objects returned no id".to_string()))?;

        let group_id = group_id.unwrap_or(DEFAULT_GROUP_ID);
        match self.link_group(user_id, group_id).await {
            Ok(()) => {}
            Err(DeviceError::Status(_, body)) if body.contains("already exists") => {}
            Err(e) => tracing::warn!("User {} created but not linked to group {}: {}", user_id, group_id, e),
        }

        Ok(user_id)
    }

    async fn link_group(&self, user_id: i64, group_id: i64) -> Result<(), DeviceError> {
        let _: Value = self
            .call(
                "/create_objects.fcgi",
                &json!({
                    "object": "user_groups",
                    "values": [{"user_id": user_id, "group_id": group_id}]
                }),
                DEFAULT_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    pub async fn delete_user(&self, user_id: i64) -> Result<(), DeviceError> {
        tracing::info!("Deleting user {} on {}", user_id, self.base_url);
        let _: Value = self
            .call(
                "/destroy_objects.fcgi",
                &json!({"object": "users", "where": {"users": {"id": user_id}}}),
                DEFAULT_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    /// Remove every group link of the user; returns how many were removed
    pub async fn block_user_access(&self, user_id: i64) -> Result<usize, DeviceError> {
        let links: Vec<UserGroupLink> = self
            .load_objects(ReaderObject::UserGroups)
            .await?
            .into_iter()
            .filter_map(|row| serde_json::from_value(row).ok())
            .filter(|link: &UserGroupLink| link.user_id == user_id)
            .collect();

        if links.is_empty() {
            tracing::info!("User {} is in no group on {}", user_id, self.base_url);
            return Ok(0);
        }

        for link in &links {
            let _: Value = self
                .call(
                    "/destroy_objects.fcgi",
                    &json!({
                        "object": "user_groups",
                        "where": {"user_groups": {"user_id": link.user_id, "group_id": link.group_id}}
                    }),
                    DEFAULT_TIMEOUT,
                )
                .await?;
        }

        tracing::info!("Blocked user {} on {} ({} groups)", user_id, self.base_url, links.len());
        Ok(links.len())
    }

    pub async fn unblock_user_access(
        &self,
        user_id: i64,
        group_id: Option<i64>,
    ) -> Result<(), DeviceError> {
        let group_id = group_id.unwrap_or(DEFAULT_GROUP_ID);
        tracing::info!("Unblocking user {} (group {}) on {}", user_id, group_id, self.base_url);
        self.link_group(user_id, group_id).await
    }

    /// Ask the reader to capture a face on its own screen
    pub async fn enroll_face(&self, request: &EnrollFace) -> Result<Value, DeviceError> {
        tracing::info!("Remote face enrollment for user {} on {}", request.user_id, self.base_url);
        self.call(
            "/remote_enroll.fcgi",
            &json!({
                "type": "face",
                "user_id": request.user_id,
                "save": request.save,
                "sync": request.sync,
                "auto": request.auto,
                "countdown": request.countdown,
            }),
            LONG_TIMEOUT,
        )
        .await
    }

    /// Upload a face photo; `timestamp` is seconds since the epoch
    pub async fn upload_face_image(
        &self,
        user_id: i64,
        image: Vec<u8>,
        timestamp: i64,
    ) -> Result<Value, DeviceError> {
        tracing::info!(
            "Uploading {} byte face image for user {} to {}",
            image.len(),
            user_id,
            self.base_url
        );
        let url = self.url("/user_set_image.fcgi");
        let response = self
            .send_with_session(LONG_TIMEOUT, |session| {
                self.http
                    .post(&url)
                    .query(&[
                        ("user_id", user_id.to_string()),
                        ("timestamp", timestamp.to_string()),
                        ("match", "1".to_string()),
                        ("session", session.to_string()),
                    ])
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(image.clone())
            })
            .await?;
        self.decode(response).await
    }

    pub async fn get_user_image(&self, user_id: i64) -> Result<Value, DeviceError> {
        self.get(
            "/user_get_image.fcgi",
            &[
                ("user_id", user_id.to_string()),
                ("get_timestamp", "1".to_string()),
            ],
        )
        .await
    }

    pub async fn list_users_with_faces(&self) -> Result<Vec<Value>, DeviceError> {
        let mut body: Value = self
            .get("/user_list_images.fcgi", &[("get_timestamp", "1".to_string())])
            .await?;
        Ok(match body.get_mut("image_info").map(Value::take) {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        })
    }

    pub async fn remove_user_face(&self, user_id: i64) -> Result<(), DeviceError> {
        tracing::info!("Removing face of user {} on {}", user_id, self.base_url);
        let _: Value = self
            .call(
                "/user_remove_image.fcgi",
                &json!({"user_id": user_id}),
                DEFAULT_TIMEOUT,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> ControlIdClient {
        ControlIdClient::new(reqwest::Client::new(), server.url(), "admin", "admin")
    }

    async fn mock_login(server: &mut mockito::ServerGuard, session: &str) -> mockito::Mock {
        server
            .mock("POST", "/login.fcgi")
            .match_body(Matcher::Json(json!({"login": "admin", "password": "admin"})))
            .with_status(200)
            .with_body(json!({"session": session}).to_string())
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_session_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let login = mock_login(&mut server, "sess-1").await.expect(1);
        let info = server
            .mock("POST", "/system_information.fcgi")
            .match_query(Matcher::UrlEncoded("session".into(), "sess-1".into()))
            .with_status(200)
            .with_body(r#"{"serial":"0M0200"}"#)
            .expect(2)
            .create_async()
            .await;

        let reader = client(&server);
        reader.system_information().await.unwrap();
        let value = reader.system_information().await.unwrap();

        assert_eq!(value["serial"], "0M0200");
        login.assert_async().await;
        info.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_session_triggers_single_relogin() {
        let mut server = mockito::Server::new_async().await;
        let login = mock_login(&mut server, "sess-2").await.expect(2);
        let users = server
            .mock("POST", "/load_objects.fcgi")
            .match_query(Matcher::Any)
            .with_status(401)
            .expect(2)
            .create_async()
            .await;

        let reader = client(&server);
        let result = reader.load_objects(ReaderObject::Users).await;

        assert!(matches!(result, Err(DeviceError::AuthRejected(_))));
        login.assert_async().await;
        users.assert_async().await;
    }

    #[tokio::test]
    async fn test_relogin_then_success() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, "fresh").await;
        // Only the fresh session is accepted
        server
            .mock("POST", "/load_objects.fcgi")
            .match_query(Matcher::UrlEncoded("session".into(), "stale".into()))
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("POST", "/load_objects.fcgi")
            .match_query(Matcher::UrlEncoded("session".into(), "fresh".into()))
            .with_status(200)
            .with_body(r#"{"groups":[{"id":1,"name":"Alunos"}]}"#)
            .create_async()
            .await;

        let reader = client(&server);
        *reader.session.write().await = Some("stale".to_string());

        let groups = reader.load_objects(ReaderObject::Groups).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["name"], "Alunos");
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login.fcgi")
            .with_status(401)
            .create_async()
            .await;

        let result = client(&server).login().await;
        assert!(matches!(result, Err(DeviceError::AuthRejected(_))));
    }

    #[tokio::test]
    async fn test_create_user_links_default_group() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, "s").await;
        let user = server
            .mock("POST", "/create_objects.fcgi")
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(json!({
                "object": "users",
                "values": [{"name": "Ana", "registration": "42", "end_time": NO_EXPIRY}]
            })))
            .with_status(200)
            .with_body(r#"{"ids":[1001]}"#)
            .create_async()
            .await;
        let link = server
            .mock("POST", "/create_objects.fcgi")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({
                "object": "user_groups",
                "values": [{"user_id": 1001, "group_id": 1}]
            })))
            .with_status(200)
            .with_body(r#"{"ids":[5]}"#)
            .create_async()
            .await;

        let id = client(&server).create_user("Ana", "42", None).await.unwrap();

        assert_eq!(id, 1001);
        user.assert_async().await;
        link.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_user_without_id_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, "s").await;
        server
            .mock("POST", "/create_objects.fcgi")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"ids":[]}"#)
            .create_async()
            .await;

        let result = client(&server).create_user("Ana", "42", Some(2)).await;
        assert!(matches!(result, Err(DeviceError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_block_user_removes_only_their_links() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, "s").await;
        server
            .mock("POST", "/load_objects.fcgi")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({"user_groups": [
                    {"user_id": 7, "group_id": 1},
                    {"user_id": 7, "group_id": 3},
                    {"user_id": 8, "group_id": 1}
                ]})
                .to_string(),
            )
            .create_async()
            .await;
        let destroy = server
            .mock("POST", "/destroy_objects.fcgi")
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(json!({
                "object": "user_groups",
                "where": {"user_groups": {"user_id": 7}}
            })))
            .with_status(200)
            .with_body("{}")
            .expect(2)
            .create_async()
            .await;

        let removed = client(&server).block_user_access(7).await.unwrap();

        assert_eq!(removed, 2);
        destroy.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_face_image_sends_raw_bytes() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, "s").await;
        let upload = server
            .mock("POST", "/user_set_image.fcgi")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("user_id".into(), "7".into()),
                Matcher::UrlEncoded("timestamp".into(), "1700000000".into()),
                Matcher::UrlEncoded("match".into(), "1".into()),
            ]))
            .match_header("content-type", "application/octet-stream")
            .match_body(vec![0xFF, 0xD8, 0xFF])
            .with_status(200)
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let result = client(&server)
            .upload_face_image(7, vec![0xFF, 0xD8, 0xFF], 1_700_000_000)
            .await
            .unwrap();

        assert_eq!(result["success"], true);
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_users_with_faces_reads_image_info() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, "s").await;
        server
            .mock("GET", "/user_list_images.fcgi")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"image_info":[{"user_id":7,"timestamp":1700000000}]}"#)
            .create_async()
            .await;

        let faces = client(&server).list_users_with_faces().await.unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0]["user_id"], 7);
    }

    #[tokio::test]
    async fn test_error_status_and_garbage_body() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, "s").await;
        server
            .mock("POST", "/destroy_objects.fcgi")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"no such user"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/user_remove_image.fcgi")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let reader = client(&server);
        match reader.delete_user(99).await {
            Err(DeviceError::Status(400, body)) => assert!(body.contains("no such user")),
            other => panic!("expected status error, got {:?}", other),
        }
        assert!(matches!(
            reader.remove_user_face(99).await,
            Err(DeviceError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_reader() {
        // Bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let reader = ControlIdClient::new(
            reqwest::Client::new(),
            format!("http://127.0.0.1:{}", port),
            "admin",
            "admin",
        );

        assert!(!reader.check_status().await);
        assert!(matches!(
            reader.login().await,
            Err(DeviceError::Unreachable(_))
        ));
    }
}
