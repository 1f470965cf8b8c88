//! MCP server over stdio.
//!
//! Bridges the [`ToolRegistry`] onto the MCP JSON-RPC protocol: the
//! line-delimited stdio stream carries requests in, one JSON object per
//! tool result out. Each invocation runs to completion before its
//! response is emitted; the transport may issue further invocations
//! concurrently, all sharing one [`ServiceContext`].
//!
//! Tool failures are not protocol failures: they are rendered from the
//! error taxonomy as `{"status": "error", "kind", "message",
//! "retryable"}` inside a successful JSON-RPC response, so agents can
//! react to `retryable` without parsing transport errors.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};

use crate::context::ServiceContext;
use crate::tools::ToolRegistry;

/// Tools that never mutate the store or the filesystem.
const READ_ONLY_TOOLS: &[&str] = &[
    "search_documents",
    "get_document_by_path",
    "get_metadata_stats",
    "get_stats",
    "get_version_history",
    "verify_document",
    "verify_category",
    "audit_storage_integrity",
    "export_documents",
    "list_backups",
];

/// Bridges the tool registry to the MCP JSON-RPC protocol.
///
/// Each session receives a clone; the registry and service context are
/// shared behind `Arc`.
#[derive(Clone)]
pub struct VaultServer {
    ctx: ServiceContext,
    tools: Arc<ToolRegistry>,
}

impl VaultServer {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            ctx,
            tools: Arc::new(ToolRegistry::with_builtins()),
        }
    }

    /// Convert a vault tool into an rmcp `Tool` descriptor.
    fn to_mcp_tool(tool: &dyn crate::tools::Tool) -> Tool {
        let schema_value = tool.parameters_schema();
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> = match schema_value {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };

        Tool {
            name: Cow::Owned(tool.name().to_string()),
            title: None,
            description: Some(Cow::Owned(tool.description().to_string())),
            input_schema,
            output_schema: None,
            annotations: Some(
                ToolAnnotations::new().read_only(READ_ONLY_TOOLS.contains(&tool.name())),
            ),
            icons: None,
        }
    }
}

impl ServerHandler for VaultServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "kbvault".to_string(),
                title: Some("Knowledge-Base Vault".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "kbvault — versioned document and code storage over a vector store. \
                 Use add_document / add_file / add_code to ingest, search_documents to \
                 retrieve, get_version_history to inspect prior versions, and \
                 verify_* / audit_storage_integrity to check integrity. Duplicate \
                 writes are detected automatically; content updates deprecate the \
                 prior version instead of overwriting it."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .tools
            .tools()
            .iter()
            .map(|t| Self::to_mcp_tool(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool = self.tools.find(&request.name).ok_or_else(|| {
            McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            )
        })?;

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match tool.execute(params, &self.ctx).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => {
                tracing::debug!(tool = request.name.as_ref(), kind = e.kind(), error = %e, "tool call failed");
                let body = serde_json::to_string_pretty(&e.to_response()).unwrap_or_default();
                Ok(CallToolResult::error(vec![Content::text(body)]))
            }
        }
    }
}

/// Serve the tool set over stdio until the peer disconnects.
pub async fn run_server(ctx: ServiceContext) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let server = VaultServer::new(ctx);
    tracing::info!("kbvault MCP server listening on stdio");
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
