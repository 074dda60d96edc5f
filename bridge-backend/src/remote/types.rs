//! Typed results per remote-API operation.
//!
//! Responses are decoded here, once, at the client boundary. Nothing
//! downstream inspects raw JSON.

use serde_json::Value;

/// Current remote profile for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProfile {
    pub remote_id: String,
    pub handle: String,
    pub display_name: String,
    pub avatar_url: String,
}

impl RemoteProfile {
    pub fn from_value(v: &Value) -> Option<Self> {
        Some(Self {
            remote_id: v.get("id")?.as_str()?.to_string(),
            handle: v.get("username")?.as_str()?.to_string(),
            display_name: v
                .get("full_name")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string(),
            avatar_url: v
                .get("profile_picture")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Video => "mp4",
        }
    }
}

/// One downloadable content item within a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// One remote post: a single image, a single video, or an ordered carousel.
/// Unsupported slide types are dropped at decode time with a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePost {
    pub id: String,
    pub owner_remote_id: String,
    pub owner_handle: String,
    pub caption: Option<String>,
    pub items: Vec<MediaItem>,
}

impl RemotePost {
    pub fn from_value(v: &Value) -> Option<Self> {
        let id = v.get("id")?.as_str()?.to_string();
        let owner = v.get("user")?;
        let owner_remote_id = owner.get("id")?.as_str()?.to_string();
        let owner_handle = owner.get("username")?.as_str()?.to_string();
        let caption = v
            .get("caption")
            .and_then(|c| c.get("text"))
            .and_then(|t| t.as_str())
            .map(|t| t.to_string());

        let mut items = Vec::new();
        match v.get("type").and_then(|t| t.as_str()) {
            Some("image") => {
                if let Some(item) = decode_item(v, MediaKind::Image) {
                    items.push(item);
                }
            }
            Some("video") => {
                if let Some(item) = decode_item(v, MediaKind::Video) {
                    items.push(item);
                }
            }
            Some("carousel") => {
                for slide in v
                    .get("carousel_media")
                    .and_then(|c| c.as_array())
                    .map(|a| a.as_slice())
                    .unwrap_or_default()
                {
                    match slide.get("type").and_then(|t| t.as_str()) {
                        Some("image") => {
                            if let Some(item) = decode_item(slide, MediaKind::Image) {
                                items.push(item);
                            }
                        }
                        Some("video") => {
                            if let Some(item) = decode_item(slide, MediaKind::Video) {
                                items.push(item);
                            }
                        }
                        other => {
                            log::warn!(
                                "Unknown slide type {:?} in carousel post {}",
                                other,
                                id
                            );
                        }
                    }
                }
            }
            other => {
                log::warn!("Unknown media type {:?} for post {}", other, id);
            }
        }

        Some(Self {
            id,
            owner_remote_id,
            owner_handle,
            caption,
            items,
        })
    }
}

fn decode_item(v: &Value, kind: MediaKind) -> Option<MediaItem> {
    let container = match kind {
        MediaKind::Image => v.get("images")?,
        MediaKind::Video => v.get("videos")?,
    };
    let res = container.get("standard_resolution")?;
    Some(MediaItem {
        kind,
        url: res.get("url")?.as_str()?.to_string(),
        width: res.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32,
        height: res.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32,
    })
}

/// Result of a successful OAuth code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub remote_id: String,
    pub handle: String,
}

impl TokenGrant {
    pub fn from_value(v: &Value) -> Option<Self> {
        let user = v.get("user")?;
        Some(Self {
            access_token: v.get("access_token")?.as_str()?.to_string(),
            remote_id: user.get("id")?.as_str()?.to_string(),
            handle: user.get("username")?.as_str()?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_single_image_post() {
        let v = json!({
            "id": "post-1",
            "type": "image",
            "user": {"id": "123", "username": "alice_feed"},
            "caption": {"text": "hello"},
            "images": {"standard_resolution": {"url": "http://cdn/p.jpg", "width": 640, "height": 480}}
        });
        let post = RemotePost::from_value(&v).unwrap();
        assert_eq!(post.id, "post-1");
        assert_eq!(post.owner_handle, "alice_feed");
        assert_eq!(post.caption.as_deref(), Some("hello"));
        assert_eq!(post.items.len(), 1);
        assert_eq!(post.items[0].kind, MediaKind::Image);
        assert_eq!(post.items[0].width, 640);
    }

    #[test]
    fn carousel_preserves_order_and_drops_unknown_slides() {
        let v = json!({
            "id": "post-2",
            "type": "carousel",
            "user": {"id": "123", "username": "alice_feed"},
            "caption": null,
            "carousel_media": [
                {"type": "image", "images": {"standard_resolution": {"url": "http://cdn/1.jpg", "width": 1, "height": 1}}},
                {"type": "hologram"},
                {"type": "video", "videos": {"standard_resolution": {"url": "http://cdn/2.mp4", "width": 2, "height": 2}}}
            ]
        });
        let post = RemotePost::from_value(&v).unwrap();
        assert_eq!(post.items.len(), 2);
        assert_eq!(post.items[0].url, "http://cdn/1.jpg");
        assert_eq!(post.items[1].kind, MediaKind::Video);
    }

    #[test]
    fn unsupported_post_type_decodes_with_no_items() {
        let v = json!({
            "id": "post-3",
            "type": "poll",
            "user": {"id": "123", "username": "alice_feed"}
        });
        let post = RemotePost::from_value(&v).unwrap();
        assert!(post.items.is_empty());
    }

    #[test]
    fn token_grant_decodes_exchange_response() {
        let v = json!({
            "access_token": "T",
            "user": {"id": "123", "username": "alice_ig"}
        });
        let grant = TokenGrant::from_value(&v).unwrap();
        assert_eq!(grant.access_token, "T");
        assert_eq!(grant.remote_id, "123");
        assert_eq!(grant.handle, "alice_ig");
    }
}
