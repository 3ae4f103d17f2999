//! Line-delimited JSON-RPC server loop over stdio.
//!
//! Requests are handled concurrently so a tool waiting on a
//! `sampling/createMessage` round-trip never blocks the reader that has to
//! deliver the client's answer.

use std::sync::Arc;

use {
    serde_json::{Value, json},
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        task::JoinSet,
    },
    tracing::{debug, info, warn},
};

use crate::{
    error::Result,
    tools::ToolRegistry,
    transport::Peer,
    types::{
        InitializeParams, InitializeResult, Incoming, JsonRpcError, JsonRpcRequest,
        JsonRpcResponse, PROTOCOL_VERSION, ServerCapabilities, ServerInfo, ToolsCallParams,
        ToolsCallResult, ToolsCapability, ToolsListResult, error_codes,
    },
};

pub const SERVER_NAME: &str = "qq-agent";

const INSTRUCTIONS: &str = "Read recent QQ group and friend messages, send replies, \
     and compress old context. Messages are buffered per group or friend as they arrive.";

pub struct McpServer {
    tools: ToolRegistry,
    peer: Arc<Peer>,
}

impl McpServer {
    pub fn new(tools: ToolRegistry, peer: Arc<Peer>) -> Self {
        Self { tools, peer }
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// Serve until `reader` reaches EOF, then wait for in-flight requests.
    pub async fn serve(self: Arc<Self>, reader: impl AsyncRead + Unpin + Send) -> Result<()> {
        let mut lines = BufReader::new(reader).lines();
        let mut inflight = JoinSet::new();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!(raw = %line, "client -> server");

            match Incoming::parse(line) {
                Ok(Incoming::Request(req)) => {
                    let server = Arc::clone(&self);
                    inflight.spawn(async move { server.handle_request(req).await });
                },
                Ok(Incoming::Response(resp)) => self.peer.resolve(resp).await,
                Ok(Incoming::Notification(n)) => debug!(method = %n.method, "notification"),
                Err(e) => {
                    warn!(error = %e, "unparseable client message");
                    let resp = JsonRpcResponse::failure(
                        Value::Null,
                        JsonRpcError::new(error_codes::PARSE_ERROR, format!("Parse error: {e}")),
                    );
                    self.peer.respond(&resp).await?;
                },
            }

            while let Some(done) = inflight.try_join_next() {
                if let Err(e) = done {
                    warn!(error = %e, "request task panicked");
                }
            }
        }

        info!("client closed stdin");
        self.peer.close().await;
        while let Some(done) = inflight.join_next().await {
            if let Err(e) = done {
                warn!(error = %e, "request task panicked");
            }
        }
        Ok(())
    }

    async fn handle_request(&self, req: JsonRpcRequest) {
        let id = req.id.clone();
        let resp = match self.dispatch(req).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        };
        if let Err(e) = self.peer.respond(&resp).await {
            warn!(error = %e, "failed to write response");
        }
    }

    async fn dispatch(&self, req: JsonRpcRequest) -> std::result::Result<Value, JsonRpcError> {
        let params = req.params.unwrap_or(Value::Null);
        match req.method.as_str() {
            "initialize" => self.initialize(params),
            "ping" => Ok(json!({})),
            "tools/list" => to_value(&ToolsListResult {
                tools: self.tools.definitions(),
            }),
            "tools/call" => self.call_tool(params).await,
            other => Err(JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        }
    }

    fn initialize(&self, params: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: InitializeParams = if params.is_null() {
            InitializeParams::default()
        } else {
            serde_json::from_value(params)
                .map_err(|e| JsonRpcError::new(error_codes::INVALID_PARAMS, e.to_string()))?
        };
        let sampling = params.capabilities.sampling.is_some();
        self.peer.set_supports_sampling(sampling);
        info!(
            client = params.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
            protocol = %params.protocol_version,
            sampling,
            "client initialized"
        );

        to_value(&InitializeResult {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.into(),
                version: Some(env!("CARGO_PKG_VERSION").into()),
            },
            instructions: Some(INSTRUCTIONS.into()),
        })
    }

    async fn call_tool(&self, params: Value) -> std::result::Result<Value, JsonRpcError> {
        let call: ToolsCallParams = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::new(error_codes::INVALID_PARAMS, e.to_string()))?;
        let Some(tool) = self.tools.get(&call.name) else {
            return Err(JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Unknown tool: {}", call.name),
            ));
        };

        debug!(tool = %call.name, "tool call");
        let result = match tool.execute(call.arguments).await {
            Ok(value) => {
                let text = serde_json::to_string_pretty(&value).map_err(internal)?;
                ToolsCallResult::text(text, false)
            },
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool failed");
                ToolsCallResult::text(e.to_string(), true)
            },
        };
        to_value(&result)
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(internal)
}

fn internal(e: serde_json::Error) -> JsonRpcError {
    JsonRpcError::new(error_codes::INTERNAL_ERROR, e.to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{FakeApi, test_config, tools_with_peer},
        qq_agent_common::types::TargetKey,
        qq_agent_context::Message,
        tokio::{
            io::{AsyncWriteExt, DuplexStream, Lines},
            task::JoinHandle,
        },
    };

    struct Client {
        input: DuplexStream,
        output: Lines<BufReader<DuplexStream>>,
        server: JoinHandle<Result<()>>,
    }

    impl Client {
        async fn send(&mut self, msg: Value) {
            let mut line = msg.to_string();
            line.push('\n');
            self.input.write_all(line.as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = self.output.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn call(&mut self, id: u64, method: &str, params: Value) -> Value {
            self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
                .await;
            self.recv().await
        }
    }

    fn start() -> (Client, Arc<crate::tools::ToolContext>) {
        let (input, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, output) = tokio::io::duplex(64 * 1024);
        let peer = Arc::new(Peer::new(server_out));
        let config = test_config(Some(vec!["100"]), vec![]);
        let (_, ctx) = tools_with_peer(FakeApi::default(), &config, Arc::clone(&peer));
        let server = Arc::new(McpServer::new(
            ToolRegistry::with_qq_tools(Arc::clone(&ctx)),
            peer,
        ));
        let client = Client {
            input,
            output: BufReader::new(output).lines(),
            server: tokio::spawn(server.serve(server_in)),
        };
        (client, ctx)
    }

    fn tool_payload(resp: &Value) -> Value {
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn initialize_and_list_tools() {
        let (mut client, _) = start();
        let init = client
            .call(1, "initialize", json!({"protocolVersion": PROTOCOL_VERSION, "capabilities": {}}))
            .await;
        assert_eq!(init["id"], 1);
        assert_eq!(init["result"]["serverInfo"]["name"], "qq-agent");
        assert!(init["result"]["capabilities"]["tools"].is_object());

        client
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        let list = client.call(2, "tools/list", json!({})).await;
        let names: Vec<&str> = list["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 6);
        assert!(names.contains(&"send_message"));
        assert!(list["result"]["tools"][0]["inputSchema"].is_object());

        let pong = client.call(3, "ping", Value::Null).await;
        assert_eq!(pong["result"], json!({}));
    }

    #[tokio::test]
    async fn policy_rejection_is_a_tool_payload() {
        let (mut client, _) = start();
        let resp = client
            .call(
                1,
                "tools/call",
                json!({"name": "get_recent_context", "arguments": {"target": "999"}}),
            )
            .await;
        assert_eq!(resp["result"]["isError"], false);
        assert_eq!(tool_payload(&resp)["error"], "Group 999 is not monitored");
    }

    #[tokio::test]
    async fn protocol_errors() {
        let (mut client, _) = start();
        let resp = client.call(1, "resources/list", json!({})).await;
        assert_eq!(resp["error"]["code"], error_codes::METHOD_NOT_FOUND);

        let resp = client
            .call(2, "tools/call", json!({"name": "nope", "arguments": {}}))
            .await;
        assert_eq!(resp["error"]["code"], error_codes::INVALID_PARAMS);

        let resp = client
            .call(3, "tools/call", json!({"name": "send_message", "arguments": {}}))
            .await;
        assert_eq!(resp["result"]["isError"], true);

        client.input.write_all(b"{not json\n").await.unwrap();
        let resp = client.recv().await;
        assert_eq!(resp["error"]["code"], error_codes::PARSE_ERROR);
        assert!(resp["id"].is_null());
    }

    #[tokio::test]
    async fn compress_round_trips_through_client_sampling() {
        let (mut client, ctx) = start();
        client
            .call(
                1,
                "initialize",
                json!({"protocolVersion": PROTOCOL_VERSION, "capabilities": {"sampling": {}}}),
            )
            .await;
        let key = TargetKey::group("100");
        ctx.manager.add_message(&key, Message::outbound("10001", "第一句", "1"));
        ctx.manager.add_message(&key, Message::outbound("10001", "第二句", "2"));

        client
            .send(json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": {"name": "compress_context", "arguments": {"target": "100"}},
            }))
            .await;

        let sampling = client.recv().await;
        assert_eq!(sampling["method"], "sampling/createMessage");
        let prompt = sampling["params"]["messages"][0]["content"]["text"]
            .as_str()
            .unwrap();
        assert!(prompt.contains("bot: 第一句"));
        client
            .send(json!({
                "jsonrpc": "2.0",
                "id": sampling["id"],
                "result": {
                    "role": "assistant",
                    "content": {"type": "text", "text": " 机器人说了两句话 "},
                    "model": "test-model",
                },
            }))
            .await;

        let resp = client.recv().await;
        assert_eq!(resp["id"], 2);
        let payload = tool_payload(&resp);
        assert_eq!(payload["success"], true);
        assert_eq!(payload["method"], "llm");
        assert_eq!(payload["compressed"], 2);
        assert_eq!(payload["compressed_summary"], "机器人说了两句话");
        assert_eq!(ctx.manager.get_context(&key, 10).total_count, 0);
    }

    #[tokio::test]
    async fn eof_stops_the_server() {
        let (client, _) = start();
        drop(client.input);
        client.server.await.unwrap().unwrap();
    }
}
