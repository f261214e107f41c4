use rand::Rng;
use serde::{Deserialize, Deserializer};
use std::time::SystemTime;

/// 反序列化数组字段，null 或缺失时返回空 Vec
pub fn deserialize_vec_or_null<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt: Option<Vec<T>> = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// webwx 的 MsgId 等字段有时是字符串有时是数字，统一转为字符串
pub fn deserialize_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        Str(String),
        Int(i64),
        Float(f64),
    }

    let opt: Option<StringOrNumber> = Option::deserialize(deserializer)?;
    Ok(match opt {
        Some(StringOrNumber::Str(s)) => s,
        Some(StringOrNumber::Int(n)) => n.to_string(),
        Some(StringOrNumber::Float(f)) => format!("{}", f),
        None => String::new(),
    })
}

/// 当前 Unix 时间（秒）
pub fn unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// 当前 Unix 时间（毫秒）
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn random_digits(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// 生成客户端消息 ID：时间戳左移 4 位后拼接 4 位随机数
///
/// 只用于短时间窗口内关联请求与响应，不保证全局唯一
pub fn generate_client_msg_id() -> String {
    format!("{}{}", unix_secs() << 4, random_digits(4))
}

/// 生成设备 ID：`e` + 15 位随机数字
pub fn generate_device_id() -> String {
    format!("e{}", random_digits(15))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Entry {
        #[serde(deserialize_with = "deserialize_string_or_number", default)]
        id: String,
        #[serde(deserialize_with = "deserialize_vec_or_null", default)]
        list: Vec<i64>,
    }

    #[test]
    fn lenient_fields_accept_both_shapes() {
        let a: Entry = serde_json::from_str(r#"{"id":"123","list":null}"#).unwrap();
        let b: Entry = serde_json::from_str(r#"{"id":123,"list":[1,2]}"#).unwrap();
        let c: Entry = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(a.id, "123");
        assert!(a.list.is_empty());
        assert_eq!(b.id, "123");
        assert_eq!(b.list, vec![1, 2]);
        assert_eq!(c.id, "");
    }

    #[test]
    fn device_id_shape() {
        let id = generate_device_id();
        assert_eq!(id.len(), 16);
        assert!(id.starts_with('e'));
        assert!(id[1..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn client_msg_id_is_timestamp_derived() {
        let before = unix_secs() << 4;
        let id = generate_client_msg_id();
        let (ts, suffix) = id.split_at(id.len() - 4);
        assert!(ts.parse::<i64>().unwrap() >= before);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }
}
