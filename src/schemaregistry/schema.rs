use serde::{Deserialize, Serialize};

/// Schema Registry に登録されたスキーマを表す。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredSchema {
    /// Schema Registry が割り当てたグローバルスキーマ ID。
    pub id: i32,
    /// サブジェクト名（ID 指定で取得した場合は空文字列のことがある）。
    pub subject: String,
    /// スキーマ定義文字列。
    pub schema: String,
    pub schema_type: SchemaType,
}

/// スキーマのフォーマット種別。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaType {
    Avro,
    /// JSON Schema 形式。serde_json でエンコードするペイロードの既定値。
    #[default]
    Json,
    Protobuf,
}

impl SchemaType {
    /// Confluent Schema Registry API で使用する文字列表現を返す。
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Avro => "AVRO",
            SchemaType::Json => "JSON",
            SchemaType::Protobuf => "PROTOBUF",
        }
    }
}

impl std::fmt::Display for SchemaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `/subjects/{subject}/versions` へのスキーマ登録リクエスト。
#[derive(Debug, Serialize)]
pub(crate) struct RegisterSchemaRequest<'a> {
    pub schema: &'a str,
    #[serde(rename = "schemaType")]
    pub schema_type: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterSchemaResponse {
    pub id: i32,
}

/// `/schemas/ids/{id}` のレスポンス。
#[derive(Debug, Deserialize)]
pub(crate) struct SchemaByIdResponse {
    pub schema: String,
    /// Confluent は AVRO の場合 schemaType を省略する。
    #[serde(rename = "schemaType", default = "default_schema_type_str")]
    pub schema_type: String,
}

fn default_schema_type_str() -> String {
    "AVRO".to_string()
}

/// 文字列から SchemaType へ変換する。大文字小文字を区別せず、不明な場合は Avro。
pub(crate) fn parse_schema_type(s: &str) -> SchemaType {
    match s.to_uppercase().as_str() {
        "PROTOBUF" => SchemaType::Protobuf,
        "JSON" => SchemaType::Json,
        _ => SchemaType::Avro,
    }
}
