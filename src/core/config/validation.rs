use serde_json::{Map, Value};

use crate::core::errors::ApiError;

const STORE_BACKENDS: [&str; 4] = ["sqlite", "local", "pinecone", "memory"];
const EMBEDDING_PROVIDERS: [&str; 2] = ["openai", "pinecone"];
const PINECONE_METRICS: [&str; 3] = ["cosine", "dotproduct", "euclidean"];

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(ingest) = expect_optional_object(root, "ingest")? {
        validate_optional_string_field(ingest, "ingest.data_dir", "data_dir")?;
        validate_u64_field(ingest, "ingest.chunk_size", "chunk_size", 1, 1_000_000)?;
        validate_u64_field(ingest, "ingest.chunk_overlap", "chunk_overlap", 0, 1_000_000)?;
        validate_u64_field(ingest, "ingest.max_json_files", "max_json_files", 0, 100_000)?;
        validate_u64_field(
            ingest,
            "ingest.embed_batch_size",
            "embed_batch_size",
            1,
            2_048,
        )?;

        let size = ingest.get("chunk_size").and_then(Value::as_u64).unwrap_or(1000);
        let overlap = ingest.get("chunk_overlap").and_then(Value::as_u64).unwrap_or(200);
        if overlap >= size {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at 'ingest.chunk_overlap': must be smaller than chunk_size ({})",
                size
            )));
        }
    }

    if let Some(store) = expect_optional_object(root, "store")? {
        validate_enum_field(store, "store.backend", "backend", &STORE_BACKENDS)?;
        validate_optional_string_field(store, "store.path", "path")?;
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_enum_field(
            embedding,
            "embedding.provider",
            "provider",
            &EMBEDDING_PROVIDERS,
        )?;
        validate_optional_string_field(embedding, "embedding.model", "model")?;
        validate_u64_field(embedding, "embedding.dimension", "dimension", 1, 20_000)?;
    }

    if let Some(chat) = expect_optional_object(root, "chat")? {
        validate_optional_string_field(chat, "chat.model", "model")?;
        validate_f64_field(chat, "chat.temperature", "temperature", 0.0, 2.0)?;
        validate_u64_field(chat, "chat.max_tokens", "max_tokens", 1, 1_000_000)?;
        validate_u64_field(chat, "chat.top_k", "top_k", 1, 100)?;
        validate_f64_field(chat, "chat.min_score", "min_score", -1.0, 1.0)?;
        validate_bool_field(chat, "chat.show_sources", "show_sources")?;
        validate_u64_field(
            chat,
            "chat.max_context_chars",
            "max_context_chars",
            100,
            10_000_000,
        )?;
        validate_u64_field(chat, "chat.max_history", "max_history", 1, 100_000)?;
        validate_optional_string_field(chat, "chat.system_prompt", "system_prompt")?;
    }

    if let Some(openai) = expect_optional_object(root, "openai")? {
        validate_optional_string_field(openai, "openai.api_key", "api_key")?;
        validate_optional_string_field(openai, "openai.base_url", "base_url")?;
    }

    if let Some(pinecone) = expect_optional_object(root, "pinecone")? {
        validate_optional_string_field(pinecone, "pinecone.api_key", "api_key")?;
        validate_index_name(pinecone)?;
        validate_optional_string_field(pinecone, "pinecone.namespace", "namespace")?;
        validate_optional_string_field(pinecone, "pinecone.cloud", "cloud")?;
        validate_optional_string_field(pinecone, "pinecone.region", "region")?;
        validate_enum_field(pinecone, "pinecone.metric", "metric", &PINECONE_METRICS)?;
        validate_optional_string_field(pinecone, "pinecone.control_url", "control_url")?;
    }

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
        validate_optional_string_field(server, "server.api_token", "api_token")?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(config_type_error(key, "object")),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn validate_enum_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    allowed: &[&str],
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if allowed.contains(&text.to_ascii_lowercase().as_str()) {
        return Ok(());
    }
    Err(ApiError::BadRequest(format!(
        "Invalid config at '{}': expected one of {}",
        path,
        allowed.join(", ")
    )))
}

/// Pinecone index names: lowercase alphanumerics and '-', at most 45 chars.
fn validate_index_name(section: &Map<String, Value>) -> Result<(), ApiError> {
    let path = "pinecone.index_name";
    let Some(value) = section.get("index_name") else {
        return Ok(());
    };
    let Some(name) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    let valid = !name.is_empty()
        && name.len() <= 45
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        return Ok(());
    }
    Err(ApiError::BadRequest(format!(
        "Invalid config at '{}': use 1-45 lowercase letters, digits or '-'",
        path
    )))
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
