use serde_json::{Map, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::{require_text, strip_system_fields, unique_as_duplicate, ServiceError};
use crate::database::models::MessageTemplate;
use crate::database::TenantRepository;

/// Placeholder names in order of first appearance; accepts `{name}` and `{{name}}`
pub fn extract_variables(content: &str) -> Vec<String> {
    let mut found = Vec::new();
    for (_, name, _) in placeholders(content) {
        if !found.iter().any(|f: &String| f == name) {
            found.push(name.to_string());
        }
    }
    found
}

/// Substitute known placeholders, leaving unknown ones untouched
pub fn render(content: &str, values: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for (start, name, end) in placeholders(content) {
        if let Some(value) = values.get(name) {
            out.push_str(&content[cursor..start]);
            out.push_str(value);
            cursor = end;
        }
    }
    out.push_str(&content[cursor..]);
    out
}

/// (start, name, end) byte spans of every well-formed placeholder
fn placeholders(content: &str) -> Vec<(usize, &str, usize)> {
    let bytes = content.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        let double = bytes.get(i + 1) == Some(&b'{');
        let name_start = if double { i + 2 } else { i + 1 };
        let mut j = name_start;
        while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
            j += 1;
        }
        let closing: &[u8] = if double { b"}}" } else { b"}" };
        if j > name_start && bytes[j..].starts_with(closing) {
            spans.push((i, &content[name_start..j], j + closing.len()));
            i = j + closing.len();
        } else {
            i += 1;
        }
    }
    spans
}

pub struct TemplateService {
    repo: TenantRepository<MessageTemplate>,
}

impl TemplateService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: TenantRepository::new(pool),
        }
    }

    pub async fn list(&self, clinic_id: Uuid, offset: i64, limit: i64) -> Result<Vec<MessageTemplate>, ServiceError> {
        Ok(self.repo.get_by_clinic(clinic_id, offset, limit).await?)
    }

    pub async fn get(&self, clinic_id: Uuid, id: Uuid) -> Result<MessageTemplate, ServiceError> {
        self.repo
            .get_in_clinic(clinic_id, id)
            .await
            .map_err(|_| ServiceError::NotFound("Template".to_string()))
    }

    pub async fn create(&self, clinic_id: Uuid, fields: Map<String, Value>) -> Result<MessageTemplate, ServiceError> {
        let mut fields = strip_system_fields(fields);
        let name = require_text(&fields, "name")?;
        let content = require_text(&fields, "content")?;
        fields.insert("name".into(), Value::String(name));
        fields.insert("variables".into(), Value::from(extract_variables(&content)));
        self.repo
            .create(clinic_id, fields)
            .await
            .map_err(|e| unique_as_duplicate(e, "name", "A template with this name already exists"))
    }

    pub async fn update(&self, clinic_id: Uuid, id: Uuid, fields: Map<String, Value>) -> Result<MessageTemplate, ServiceError> {
        let mut fields = strip_system_fields(fields);
        fields.remove("variables");
        self.get(clinic_id, id).await?;
        if fields.contains_key("name") {
            require_text(&fields, "name")?;
        }
        if fields.contains_key("content") {
            let content = require_text(&fields, "content")?;
            fields.insert("variables".into(), Value::from(extract_variables(&content)));
        }
        self.repo
            .update(clinic_id, id, fields)
            .await
            .map_err(|e| unique_as_duplicate(e, "name", "A template with this name already exists"))
    }

    pub async fn delete(&self, clinic_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        self.get(clinic_id, id).await?;
        Ok(self.repo.delete(clinic_id, id).await?)
    }

    pub async fn render(&self, clinic_id: Uuid, id: Uuid, values: &HashMap<String, String>) -> Result<String, ServiceError> {
        let template = self.get(clinic_id, id).await?;
        Ok(render(&template.content, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_both_placeholder_styles_once() {
        let vars = extract_variables("Hi {name}, your visit on {{date}} with {doctor}. Bye {name}!");
        assert_eq!(vars, vec!["name", "date", "doctor"]);
    }

    #[test]
    fn ignores_malformed_braces() {
        assert!(extract_variables("{ spaced } {} {{open").is_empty());
    }

    #[test]
    fn renders_known_values_only() {
        let mut values = HashMap::new();
        values.insert("name".to_string(), "Asha".to_string());
        assert_eq!(
            render("Hello {{name}}, see you {when}.", &values),
            "Hello Asha, see you {when}."
        );
    }
}
