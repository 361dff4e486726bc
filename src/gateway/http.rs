use async_trait::async_trait;
use chrono::Utc;
use futures::{ SinkExt, StreamExt };
use hmac::{ Hmac, Mac };
use log::{ debug, info, warn };
use reqwest::{ Client, RequestBuilder, Response, StatusCode };
use serde::de::DeserializeOwned;
use serde::{ Deserialize, Serialize };
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use url::Url;
use crate::cli::Args;
use crate::gateway::{ GatewayError, MessageGateway, Subscription };
use crate::models::chat::{ Attachment, Conversation, Message, ViewerRole };
use crate::models::websocket::{ ClientFrame, ServerFrame };

type HmacSha256 = Hmac<Sha256>;

const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub api_base_url: String,
    pub realtime_url: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

impl HttpGatewayConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            api_base_url: args.api_base_url.clone(),
            realtime_url: args.realtime_url.clone(),
            api_key: args.api_key.clone().filter(|k| !k.trim().is_empty()),
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody<'a> {
    sender_id: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<&'a Attachment>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkAsReadBody<'a> {
    viewer_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetOrCreateBody<'a> {
    org_id: &'a str,
    seeker_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct DeleteResponse {
    deleted: bool,
}

/// REST + WebSocket client for the remote message store.
pub struct HttpGateway {
    client: Client,
    config: HttpGatewayConfig,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        Url::parse(&config.api_base_url)?;
        Url::parse(&config.realtime_url)?;
        let client = Client::builder().timeout(config.request_timeout).build()?;
        if config.api_key.is_none() {
            warn!("HTTP gateway configured WITHOUT an API key. Requests are unauthenticated.");
        }
        Ok(Self { client, config })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.config.api_base_url)?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Config(format!("'{}' cannot be a base URL", self.config.api_base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    fn realtime_endpoint(&self, conversation_id: &str) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.config.realtime_url)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("conversationId", conversation_id);
            if let Some(secret) = &self.config.api_key {
                let ts = Utc::now().timestamp().to_string();
                let sig = sign_timestamp(secret, &ts)?;
                query.append_pair("ts", &ts);
                query.append_pair("sig", &sig);
            }
        }
        Ok(url)
    }

    async fn decode<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T, GatewayError> {
        let resp = Self::check(resp, what).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn check(resp: Response, what: &str) -> Result<Response, GatewayError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(what.to_string()));
        }
        let body = resp.text().await.unwrap_or_default();
        Err(GatewayError::Status { status: status.as_u16(), body })
    }
}

pub fn sign_timestamp(secret: &str, ts: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e|
        GatewayError::Config(format!("invalid HMAC key: {}", e))
    )?;
    mac.update(ts.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl MessageGateway for HttpGateway {
    async fn list_conversations(
        &self,
        viewer_id: &str,
        role: ViewerRole
    ) -> Result<Vec<Conversation>, GatewayError> {
        let mut url = self.endpoint(&["conversations"])?;
        url.query_pairs_mut().append_pair("viewerId", viewer_id).append_pair("role", role.as_str());
        let resp = self.authorized(self.client.get(url)).send().await?;
        Self::decode(resp, "conversations").await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, GatewayError> {
        let url = self.endpoint(&["conversations", conversation_id, "messages"])?;
        let resp = self.authorized(self.client.get(url)).send().await?;
        let mut messages: Vec<Message> = Self::decode(resp, "conversation").await?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        attachment: Option<&Attachment>
    ) -> Result<Message, GatewayError> {
        let url = self.endpoint(&["conversations", conversation_id, "messages"])?;
        let body = SendMessageBody { sender_id, content, attachment };
        let resp = self.authorized(self.client.post(url).json(&body)).send().await?;
        Self::decode(resp, "conversation").await
    }

    async fn mark_as_read(&self, conversation_id: &str, viewer_id: &str) -> Result<(), GatewayError> {
        let url = self.endpoint(&["conversations", conversation_id, "read"])?;
        let body = MarkAsReadBody { viewer_id };
        let resp = self.authorized(self.client.post(url).json(&body)).send().await?;
        Self::check(resp, "conversation").await?;
        Ok(())
    }

    async fn delete_message(
        &self,
        message_id: &str,
        requester_id: &str
    ) -> Result<bool, GatewayError> {
        let mut url = self.endpoint(&["messages", message_id])?;
        url.query_pairs_mut().append_pair("requesterId", requester_id);
        let resp = self.authorized(self.client.delete(url)).send().await?;
        if resp.status() == StatusCode::FORBIDDEN {
            return Ok(false);
        }
        let result: DeleteResponse = Self::decode(resp, "message").await?;
        Ok(result.deleted)
    }

    async fn get_or_create_conversation(
        &self,
        org_id: &str,
        seeker_id: &str,
        job_id: Option<&str>
    ) -> Result<Conversation, GatewayError> {
        let url = self.endpoint(&["conversations", "get-or-create"])?;
        let body = GetOrCreateBody { org_id, seeker_id, job_id };
        let resp = self.authorized(self.client.post(url).json(&body)).send().await?;
        Self::decode(resp, "conversation").await
    }

    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription, GatewayError> {
        let url = self.realtime_endpoint(conversation_id)?;
        let (websocket, _) = connect_async(url.as_str()).await?;
        let (mut tx, mut rx) = websocket.split();

        let frame = ClientFrame::Subscribe { conversation_id: conversation_id.to_string() };
        tx.send(WsMessage::Text(serde_json::to_string(&frame)?)).await?;
        info!("Realtime channel open for conversation {}", conversation_id);

        let (msg_tx, msg_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let conv_id = conversation_id.to_string();
        let reader = tokio::spawn(async move {
            while let Some(incoming) = rx.next().await {
                match incoming {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<ServerFrame>(&text) {
                            Ok(ServerFrame::NewMessage { message }) => {
                                if message.conversation_id != conv_id {
                                    debug!("Ignoring message {} for {}", message.id, message.conversation_id);
                                    continue;
                                }
                                if msg_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Ok(ServerFrame::Subscribed { conversation_id }) => {
                                debug!("Server confirmed subscription to {}", conversation_id);
                            }
                            Ok(ServerFrame::Error { message }) => {
                                warn!("Realtime error for {}: {}", conv_id, message);
                            }
                            Err(e) => {
                                warn!("Failed to parse realtime frame for {}: {}", conv_id, e);
                            }
                        }
                    }
                    Ok(WsMessage::Ping(data)) => {
                        if tx.send(WsMessage::Pong(data)).await.is_err() {
                            warn!("Failed to answer ping on {}", conv_id);
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        info!("Realtime channel for {} closed by server", conv_id);
                        break;
                    }
                    Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => {}
                    Ok(WsMessage::Binary(_)) => {
                        warn!("Ignoring binary frame on {}", conv_id);
                    }
                    Err(e) => {
                        warn!("Realtime transport error on {}: {}", conv_id, e);
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(conversation_id, msg_rx).with_close_hook(move || reader.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(api_key: Option<&str>) -> HttpGateway {
        HttpGateway::new(HttpGatewayConfig {
            api_base_url: "http://localhost:4000/api/".into(),
            realtime_url: "ws://localhost:4000/realtime".into(),
            api_key: api_key.map(str::to_string),
            request_timeout: Duration::from_secs(5),
        }).unwrap()
    }

    #[test]
    fn signs_timestamp_with_hmac_sha256() {
        let sig = sign_timestamp("key", "The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(sig, "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8");
    }

    #[test]
    fn endpoint_escapes_ids() {
        let url = gateway(None).endpoint(&["conversations", "a/b c", "messages"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:4000/api/conversations/a%2Fb%20c/messages");
    }

    #[test]
    fn realtime_endpoint_is_signed_only_with_key() {
        let plain = gateway(None).realtime_endpoint("c1").unwrap();
        assert_eq!(plain.query(), Some("conversationId=c1"));

        let signed = gateway(Some("secret")).realtime_endpoint("c1").unwrap();
        let pairs: Vec<(String, String)> = signed.query_pairs().into_owned().collect();
        let ts = &pairs.iter().find(|(k, _)| k == "ts").unwrap().1;
        let sig = &pairs.iter().find(|(k, _)| k == "sig").unwrap().1;
        assert_eq!(sig, &sign_timestamp("secret", ts).unwrap());
    }

    #[test]
    fn rejects_invalid_urls() {
        let result = HttpGateway::new(HttpGatewayConfig {
            api_base_url: "not a url".into(),
            realtime_url: "ws://localhost".into(),
            api_key: None,
            request_timeout: Duration::from_secs(5),
        });
        assert!(matches!(result, Err(GatewayError::Url(_))));
    }
}
