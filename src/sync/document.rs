// 远程配置的结构化表示
//
// 文档是通用的标量/序列/映射树，不绑定固定 schema。
// 映射保留文档中的键顺序用于展示；变更检测使用键排序后的规范化哈希，
// 因此远端仅调整键顺序或格式时不会被视为内容变化。

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// 最大嵌套深度
const MAX_DEPTH: usize = 128;

/// 文档节点
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Document {
    Scalar(Scalar),
    Sequence(Vec<Document>),
    /// 按文档顺序保存的键值对
    Mapping(Vec<(String, Document)>),
}

/// 标量值
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    /// 仅用于超过 i64::MAX 的整数
    Unsigned(u64),
    Float(f64),
    String(String),
}

/// 转换错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("unsupported {0} used as a mapping key")]
    ComplexKey(&'static str),

    #[error("document nested deeper than {0} levels")]
    TooDeep(usize),
}

/// 解析结果：文档或解析错误，二者其一
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedSnapshot {
    pub root: Option<Document>,
    pub parse_error: Option<String>,
}

impl ParsedSnapshot {
    pub fn parsed(root: Document) -> Self {
        Self {
            root: Some(root),
            parse_error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            root: None,
            parse_error: Some(error.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.parse_error.is_none()
    }
}

/// 解析 YAML 内容
///
/// 空文档和 `null` 视为空映射。任何失败都记录在 `parse_error` 中，不返回错误。
pub fn parse_yaml(raw: &[u8]) -> ParsedSnapshot {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => return ParsedSnapshot::failed(format!("content is not valid UTF-8: {}", e)),
    };

    if text.trim().is_empty() {
        return ParsedSnapshot::parsed(Document::empty());
    }

    let value: Value = match serde_yaml::from_str(text) {
        Ok(value) => value,
        Err(e) => return ParsedSnapshot::failed(e.to_string()),
    };

    if value.is_null() {
        return ParsedSnapshot::parsed(Document::Mapping(Vec::new()));
    }

    match Document::from_yaml(&value) {
        Ok(doc) => ParsedSnapshot::parsed(doc),
        Err(e) => ParsedSnapshot::failed(e.to_string()),
    }
}

/// 原始字节哈希（无法解析时用于变更检测）
pub fn raw_hash(raw: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(raw))
}

impl Document {
    pub fn empty() -> Self {
        Document::Mapping(Vec::new())
    }

    /// 从 YAML 值构建
    pub fn from_yaml(value: &Value) -> Result<Self, DocumentError> {
        convert(value, 0)
    }

    /// 转回 YAML 值（保持键顺序）
    pub fn to_yaml(&self) -> Value {
        match self {
            Document::Scalar(s) => s.to_yaml(),
            Document::Sequence(items) => Value::Sequence(items.iter().map(Self::to_yaml).collect()),
            Document::Mapping(entries) => {
                let mut map = serde_yaml::Mapping::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(Value::String(key.clone()), value.to_yaml());
                }
                Value::Mapping(map)
            }
        }
    }

    /// 渲染为 YAML 文本
    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.to_yaml())
    }

    /// 规范化结构的哈希，与键顺序无关
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        self.feed(&mut hasher);
        format!("sha256:{:x}", hasher.finalize())
    }

    /// 映射查找
    pub fn get(&self, key: &str) -> Option<&Document> {
        match self {
            Document::Mapping(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// 路径查找，例如 `/Nodes/0/ApiConfig/ApiHost`
    pub fn pointer(&self, path: &str) -> Option<&Document> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| match node {
                Document::Mapping(_) => node.get(segment),
                Document::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                Document::Scalar(_) => None,
            })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Document::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Document::Scalar(Scalar::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Document::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Document]> {
        match self {
            Document::Sequence(items) => Some(items),
            _ => None,
        }
    }

    fn feed(&self, hasher: &mut Sha256) {
        match self {
            Document::Scalar(scalar) => {
                hasher.update([b'S']);
                scalar.feed(hasher);
            }
            Document::Sequence(items) => {
                hasher.update([b'Q']);
                hasher.update((items.len() as u64).to_be_bytes());
                for item in items {
                    item.feed(hasher);
                }
            }
            Document::Mapping(entries) => {
                hasher.update([b'M']);
                hasher.update((entries.len() as u64).to_be_bytes());
                let mut sorted: Vec<&(String, Document)> = entries.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                for (key, value) in sorted {
                    feed_str(hasher, key);
                    value.feed(hasher);
                }
            }
        }
    }
}

impl Scalar {
    fn to_yaml(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Integer(n) => Value::Number((*n).into()),
            Scalar::Unsigned(n) => Value::Number((*n).into()),
            Scalar::Float(f) => Value::Number((*f).into()),
            Scalar::String(s) => Value::String(s.clone()),
        }
    }

    fn feed(&self, hasher: &mut Sha256) {
        match self {
            Scalar::Null => hasher.update([0u8]),
            Scalar::Bool(b) => hasher.update([1u8, u8::from(*b)]),
            Scalar::Integer(n) => {
                hasher.update([2u8]);
                hasher.update(n.to_be_bytes());
            }
            Scalar::Unsigned(n) => {
                hasher.update([3u8]);
                hasher.update(n.to_be_bytes());
            }
            Scalar::Float(f) => {
                hasher.update([4u8]);
                hasher.update(normalize_float(*f).to_be_bytes());
            }
            Scalar::String(s) => {
                hasher.update([5u8]);
                feed_str(hasher, s);
            }
        }
    }
}

fn feed_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_be_bytes());
    hasher.update(s.as_bytes());
}

/// -0.0 与 0.0、不同 NaN 位模式统一
fn normalize_float(f: f64) -> u64 {
    if f == 0.0 {
        0.0f64.to_bits()
    } else if f.is_nan() {
        f64::NAN.to_bits()
    } else {
        f.to_bits()
    }
}

fn convert(value: &Value, depth: usize) -> Result<Document, DocumentError> {
    if depth > MAX_DEPTH {
        return Err(DocumentError::TooDeep(MAX_DEPTH));
    }

    Ok(match value {
        Value::Null => Document::Scalar(Scalar::Null),
        Value::Bool(b) => Document::Scalar(Scalar::Bool(*b)),
        Value::Number(n) => Document::Scalar(number(n)),
        Value::String(s) => Document::Scalar(Scalar::String(s.clone())),
        Value::Sequence(items) => Document::Sequence(
            items
                .iter()
                .map(|item| convert(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Mapping(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (key, value) in map {
                entries.push((key_string(key)?, convert(value, depth + 1)?));
            }
            Document::Mapping(entries)
        }
        // 自定义标签只保留内部值
        Value::Tagged(tagged) => convert(&tagged.value, depth + 1)?,
    })
}

fn number(n: &serde_yaml::Number) -> Scalar {
    if let Some(i) = n.as_i64() {
        Scalar::Integer(i)
    } else if let Some(u) = n.as_u64() {
        Scalar::Unsigned(u)
    } else {
        Scalar::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn key_string(key: &Value) -> Result<String, DocumentError> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok("null".to_string()),
        Value::Tagged(tagged) => key_string(&tagged.value),
        Value::Sequence(_) => Err(DocumentError::ComplexKey("sequence")),
        Value::Mapping(_) => Err(DocumentError::ComplexKey("mapping")),
    }
}
