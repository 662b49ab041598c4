use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::engine::{EngineCache, normalize_language};
use crate::pipeline;

const SERVER_NAME: &str = "fast-paddleocr-mcp";
const TOOL_NAME: &str = "ocr_image";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

/// Runs the JSON-RPC tool server over stdio: one line in, one response
/// line out, one request in flight at a time. The engine cache lives for
/// the life of the loop.
pub async fn run_server() -> Result<()> {
    let mut cache = EngineCache::with_default_factory();
    info!("mcp server listening on stdio");

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin).lines();
    let mut writer = stdout;

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match handle_line(&line, &mut cache) {
            Ok(Some(value)) => Some(value),
            Ok(None) => None,
            Err(err) => Some(jsonrpc_error(None, INTERNAL_ERROR, &err.to_string())),
        };
        if let Some(value) = response {
            let payload = serde_json::to_vec(&value)?;
            writer.write_all(&payload).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }

    Ok(())
}

fn handle_line(line: &str, cache: &mut EngineCache) -> Result<Option<Value>> {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            return Ok(Some(jsonrpc_error(
                None,
                PARSE_ERROR,
                &format!("parse error: {err}"),
            )));
        }
    };
    let id = value.get("id").cloned();
    let method = match value.get("method").and_then(|method| method.as_str()) {
        Some(method) => method,
        None => return Ok(Some(jsonrpc_error(id, INVALID_REQUEST, "invalid request"))),
    };
    let params = value.get("params").cloned().unwrap_or_else(|| json!({}));

    let response = match method {
        "initialize" => Some(jsonrpc_response(id, initialize_result(&params))),
        "tools/list" => Some(jsonrpc_response(id, tools_list_result())),
        "tools/call" => Some(match tools_call_result(params, cache) {
            Ok(result) => jsonrpc_response(id, result),
            Err(dispatch) => jsonrpc_error(id, dispatch.code, &dispatch.message),
        }),
        "resources/list" => Some(jsonrpc_response(id, json!({ "resources": [] }))),
        "prompts/list" => Some(jsonrpc_response(id, json!({ "prompts": [] }))),
        "initialized" | "notifications/initialized" => None,
        _ => Some(jsonrpc_error(id, METHOD_NOT_FOUND, "method not found")),
    };
    Ok(response)
}

fn initialize_result(params: &Value) -> Value {
    let requested = params
        .get("protocolVersion")
        .and_then(|value| value.as_str())
        .unwrap_or("unknown");
    json!({
        "protocolVersion": requested,
        "capabilities": {
            "tools": { "listChanged": false },
            "resources": {},
            "prompts": {}
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn tools_list_result() -> Value {
    json!({
        "tools": [
            {
                "name": TOOL_NAME,
                "description": "Extract text from an image with PaddleOCR. Writes a markdown file (image path + .md) and a snapshot file (image path + .snapshot.log) with bounding boxes in original image coordinates, and returns both paths.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "image_path": {
                            "type": "string",
                            "description": "Path to the input image file"
                        },
                        "language": {
                            "type": "string",
                            "description": "Language code for OCR (e.g. 'ch' for Chinese+English, 'en', 'japan', 'korean')",
                            "default": "ch"
                        }
                    },
                    "required": ["image_path", "language"]
                }
            }
        ]
    })
}

struct DispatchError {
    code: i64,
    message: String,
}

impl DispatchError {
    fn tool_not_found(name: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("unknown tool: {name}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct OcrArgs {
    image_path: Option<String>,
    language: Option<String>,
}

fn tools_call_result(params: Value, cache: &mut EngineCache) -> Result<Value, DispatchError> {
    let name = params
        .get("name")
        .and_then(|value| value.as_str())
        .unwrap_or("");
    if name != TOOL_NAME {
        return Err(DispatchError::tool_not_found(name));
    }

    let args_value = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let args: OcrArgs = serde_json::from_value(args_value)
        .map_err(|err| DispatchError::invalid_params(format!("invalid arguments: {err}")))?;
    let Some(image_path) = args.image_path else {
        return Err(DispatchError::invalid_params("image_path is required"));
    };
    let language = normalize_language(args.language.as_deref().unwrap_or(""));

    match pipeline::run_server_request(Path::new(&image_path), &language, cache) {
        Ok(outcome) => Ok(json!({
            "content": [
                {
                    "type": "text",
                    "text": outcome.markdown_path.display().to_string()
                },
                {
                    "type": "text",
                    "text": outcome.snapshot_path.display().to_string()
                }
            ]
        })),
        Err(err) => Ok(tool_error(&format!("{err:#}"))),
    }
}

fn jsonrpc_response(id: Option<Value>, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn jsonrpc_error(id: Option<Value>, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}

fn tool_error(message: &str) -> Value {
    json!({
        "content": [
            {
                "type": "text",
                "text": message
            }
        ],
        "isError": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OcrEngine;
    use crate::recognition::PageResult;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct FixedEngine {
        texts: Vec<String>,
    }

    impl OcrEngine for FixedEngine {
        fn recognize(&self, _image: &Path) -> Result<Vec<PageResult>> {
            Ok(vec![PageResult::from_texts(self.texts.clone())])
        }
    }

    fn test_cache(texts: &[&str]) -> EngineCache {
        let texts: Vec<String> = texts.iter().map(|text| text.to_string()).collect();
        EngineCache::new(Box::new(move |_language| {
            Ok(Box::new(FixedEngine {
                texts: texts.clone(),
            }) as Box<dyn OcrEngine>)
        }))
    }

    fn handle(line: &str, cache: &mut EngineCache) -> Option<Value> {
        handle_line(line, cache).expect("handle line")
    }

    fn error_code(response: &Value) -> i64 {
        response["error"]["code"].as_i64().expect("error code")
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let mut cache = test_cache(&[]);
        let response = handle("{not json", &mut cache).expect("response");
        assert_eq!(error_code(&response), PARSE_ERROR);
    }

    #[test]
    fn unknown_methods_are_rejected() {
        let mut cache = test_cache(&[]);
        let response = handle(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/delete"}"#,
            &mut cache,
        )
        .expect("response");
        assert_eq!(error_code(&response), METHOD_NOT_FOUND);
        assert_eq!(response["id"], json!(1));
    }

    #[test]
    fn initialized_notification_has_no_response() {
        let mut cache = test_cache(&[]);
        assert!(
            handle(
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                &mut cache
            )
            .is_none()
        );
    }

    #[test]
    fn initialize_reports_server_info() {
        let mut cache = test_cache(&[]);
        let response = handle(
            r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"protocolVersion":"2024-11-05"}}"#,
            &mut cache,
        )
        .expect("response");
        assert_eq!(response["result"]["serverInfo"]["name"], json!(SERVER_NAME));
        assert_eq!(response["result"]["protocolVersion"], json!("2024-11-05"));
    }

    #[test]
    fn tools_list_exposes_the_ocr_tool() {
        let mut cache = test_cache(&[]);
        let response = handle(
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            &mut cache,
        )
        .expect("response");
        let tools = response["result"]["tools"].as_array().expect("tools");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], json!(TOOL_NAME));
        assert_eq!(
            tools[0]["inputSchema"]["required"],
            json!(["image_path", "language"])
        );
    }

    #[test]
    fn missing_image_path_is_invalid_params() {
        let mut cache = test_cache(&[]);
        let response = handle(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"ocr_image","arguments":{}}}"#,
            &mut cache,
        )
        .expect("response");
        assert_eq!(error_code(&response), INVALID_PARAMS);
    }

    #[test]
    fn wrong_argument_types_are_invalid_params() {
        let mut cache = test_cache(&[]);
        let response = handle(
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"ocr_image","arguments":{"image_path":7}}}"#,
            &mut cache,
        )
        .expect("response");
        assert_eq!(error_code(&response), INVALID_PARAMS);
    }

    #[test]
    fn unknown_tools_are_not_found() {
        let mut cache = test_cache(&[]);
        let response = handle(
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"other_tool","arguments":{}}}"#,
            &mut cache,
        )
        .expect("response");
        assert_eq!(error_code(&response), METHOD_NOT_FOUND);
    }

    #[test]
    fn missing_input_file_is_a_tool_error() {
        let mut cache = test_cache(&["never reached"]);
        let response = handle(
            r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{"name":"ocr_image","arguments":{"image_path":"/nonexistent/image.png"}}}"#,
            &mut cache,
        )
        .expect("response");
        let result = &response["result"];
        assert_eq!(result["isError"], json!(true));
        assert!(
            result["content"][0]["text"]
                .as_str()
                .expect("text")
                .contains("not found")
        );
    }

    #[test]
    fn successful_call_returns_both_output_paths() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("scan.png");
        RgbImage::from_pixel(64, 64, Rgb([255, 255, 255]))
            .save(&input)
            .expect("save test image");

        let mut cache = test_cache(&["Hello"]);
        let request = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {
                "name": TOOL_NAME,
                "arguments": { "image_path": input.display().to_string(), "language": "EN" }
            }
        });
        let response = handle(&request.to_string(), &mut cache).expect("response");
        let content = response["result"]["content"].as_array().expect("content");
        assert_eq!(content.len(), 2);

        let markdown_path = PathBuf::from(content[0]["text"].as_str().expect("md path"));
        let snapshot_path = PathBuf::from(content[1]["text"].as_str().expect("snapshot path"));
        assert!(markdown_path.ends_with("scan.png.md"));
        assert!(snapshot_path.ends_with("scan.png.snapshot.log"));

        let markdown = std::fs::read_to_string(&markdown_path).expect("read markdown");
        assert!(markdown.contains("- Hello\n"));
        // language is normalized before it reaches the output
        assert!(markdown.contains("**Language:** `en`"));
        assert!(snapshot_path.exists());
    }
}
