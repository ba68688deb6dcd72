use std::time::Duration;

use indexmap::IndexMap;
use reqwest::{StatusCode, multipart};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, trace, warn};
use url::Url;

use crate::{
    block::{Block, RichSpan},
    store::{self, BotUser, ChildBlock, Comment, Page, Paginated},
};

pub const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1/";
pub const NOTION_VERSION: &str = "2022-06-28";
const TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 3;
const PAGE_SIZE: &str = "100";

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Invalid base URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct Client {
    token: String,
    client: reqwest::Client,
    base_url: Url,
}

impl Client {
    pub fn new(token: String) -> Result<Self, BuildError> {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(token: String, base_url: &str) -> Result<Self, BuildError> {
        let mut base_url = base_url.to_owned();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            token,
            client: reqwest::Client::builder().timeout(TIMEOUT).build()?,
            base_url: base_url.parse()?,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, store::Error> {
        Ok(self.base_url.join(path)?)
    }

    /// Send a request, retrying rate-limited responses after the advertised
    /// delay. `build` is called once per attempt.
    async fn send<T: DeserializeOwned>(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder + Send,
    ) -> Result<T, store::Error> {
        let mut attempt = 0;
        loop {
            let response = build()
                .bearer_auth(&self.token)
                .header("Notion-Version", NOTION_VERSION)
                .send()
                .await?;
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES {
                attempt += 1;
                let wait = retry_after(&response);
                warn!(attempt, wait_secs = wait.as_secs(), "rate limited, retrying");
                tokio::time::sleep(wait).await;
                continue;
            }
            let text = response.text().await?;
            trace!(%status, text = %text, "Notion response");
            if status.is_success() {
                return serde_json::from_str(&text).map_err(|e| store::Error::Api {
                    status: status.as_u16(),
                    code: "invalid_json".into(),
                    message: e.to_string(),
                });
            }
            let error = classify(status, &text);
            debug!(%error, "Notion request failed");
            return Err(error);
        }
    }
}

fn retry_after(response: &reqwest::Response) -> Duration {
    let secs = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(1);
    Duration::from_secs(secs)
}

#[derive(Deserialize, Default)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

fn classify(status: StatusCode, body: &str) -> store::Error {
    let ApiError { code, message } = serde_json::from_str(body).unwrap_or_default();
    match (status.as_u16(), code.as_str()) {
        (404, _) | (_, "object_not_found") => store::Error::NotFound(message),
        (401, _) | (_, "unauthorized") => store::Error::Unauthorized(message),
        (403, _) | (_, "restricted_resource") => store::Error::Restricted(message),
        (429, _) | (_, "rate_limited") => store::Error::RateLimited,
        (400, _) | (_, "validation_error") => store::Error::Validation(message),
        (status, _) => store::Error::Api {
            status,
            code,
            message,
        },
    }
}

#[derive(Deserialize)]
struct TextObject {
    #[serde(default)]
    plain_text: String,
}

fn plain_text(spans: &[TextObject]) -> String {
    spans.iter().map(|span| span.plain_text.as_str()).collect()
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Property {
    Title {
        title: Vec<TextObject>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct PageObject {
    id: String,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    in_trash: bool,
    #[serde(default)]
    properties: IndexMap<String, Property>,
}

impl From<PageObject> for Page {
    fn from(page: PageObject) -> Self {
        let title = page
            .properties
            .values()
            .find_map(|property| match property {
                Property::Title { title } => Some(plain_text(title)),
                Property::Other => None,
            })
            .unwrap_or_default();
        Page {
            id: page.id,
            archived: page.archived || page.in_trash,
            title,
        }
    }
}

#[derive(Deserialize)]
struct List<T> {
    results: Vec<T>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

impl<T> List<T> {
    fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            results: self.results.into_iter().map(f).collect(),
            has_more: self.has_more,
            next_cursor: self.next_cursor,
        }
    }
}

#[derive(Deserialize)]
struct BlockObject {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    has_children: bool,
}

#[derive(Deserialize)]
struct UserRef {
    id: String,
}

#[derive(Deserialize)]
struct CommentObject {
    id: String,
    discussion_id: String,
    created_time: String,
    created_by: UserRef,
    #[serde(default)]
    rich_text: Vec<TextObject>,
}

#[derive(Deserialize)]
struct UserObject {
    id: String,
    name: Option<String>,
}

#[derive(Deserialize)]
struct FileUploadObject {
    id: String,
}

/// Any successful response whose body is not needed.
#[derive(Deserialize)]
struct Ignored {}

#[derive(Serialize)]
struct TitleValue {
    title: Vec<RichSpan>,
}

#[derive(Serialize)]
struct TitleProperties {
    title: TitleValue,
}

impl TitleProperties {
    fn new(title: &str) -> Self {
        Self {
            title: TitleValue {
                title: vec![RichSpan::plain(title)],
            },
        }
    }
}

#[derive(Serialize)]
struct ParentRef<'a> {
    page_id: &'a str,
}

#[derive(Serialize)]
struct CreatePage<'a> {
    parent: ParentRef<'a>,
    properties: TitleProperties,
    #[serde(skip_serializing_if = "<[Block]>::is_empty")]
    children: &'a [Block],
}

#[derive(Serialize)]
struct UpdatePage {
    properties: TitleProperties,
}

#[derive(Serialize)]
struct AppendChildren<'a> {
    children: &'a [Block],
}

#[derive(Serialize)]
struct CreateFileUpload<'a> {
    filename: &'a str,
    content_type: &'a str,
}

fn paged_query<'a>(cursor: Option<&'a str>) -> Vec<(&'static str, &'a str)> {
    let mut query = vec![("page_size", PAGE_SIZE)];
    if let Some(cursor) = cursor {
        query.push(("start_cursor", cursor));
    }
    query
}

impl store::Client for Client {
    async fn retrieve_page(&self, page_id: &str) -> Result<Page, store::Error> {
        let url = self.endpoint(&format!("pages/{page_id}"))?;
        let page: PageObject = self.send(|| self.client.get(url.clone())).await?;
        Ok(page.into())
    }

    async fn create_page(
        &self,
        parent_id: &str,
        title: &str,
        children: &[Block],
    ) -> Result<Page, store::Error> {
        let url = self.endpoint("pages")?;
        let body = CreatePage {
            parent: ParentRef { page_id: parent_id },
            properties: TitleProperties::new(title),
            children,
        };
        let page: PageObject = self
            .send(|| self.client.post(url.clone()).json(&body))
            .await?;
        debug!(page_id = %page.id, parent_id, title, "created page");
        Ok(page.into())
    }

    async fn update_page_title(&self, page_id: &str, title: &str) -> Result<(), store::Error> {
        let url = self.endpoint(&format!("pages/{page_id}"))?;
        let body = UpdatePage {
            properties: TitleProperties::new(title),
        };
        let _: Ignored = self
            .send(|| self.client.patch(url.clone()).json(&body))
            .await?;
        Ok(())
    }

    async fn append_children(&self, block_id: &str, children: &[Block]) -> Result<(), store::Error> {
        let url = self.endpoint(&format!("blocks/{block_id}/children"))?;
        let body = AppendChildren { children };
        let _: Ignored = self
            .send(|| self.client.patch(url.clone()).json(&body))
            .await?;
        debug!(block_id, count = children.len(), "appended children");
        Ok(())
    }

    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<Paginated<ChildBlock>, store::Error> {
        let url = self.endpoint(&format!("blocks/{block_id}/children"))?;
        let query = paged_query(cursor);
        let list: List<BlockObject> = self
            .send(|| self.client.get(url.clone()).query(&query))
            .await?;
        Ok(list.map(|block| ChildBlock {
            id: block.id,
            kind: block.kind,
            has_children: block.has_children,
        }))
    }

    async fn archive_block(&self, block_id: &str) -> Result<(), store::Error> {
        let url = self.endpoint(&format!("blocks/{block_id}"))?;
        let _: Ignored = self.send(|| self.client.delete(url.clone())).await?;
        Ok(())
    }

    async fn create_file_upload(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, store::Error> {
        let url = self.endpoint("file_uploads")?;
        let body = CreateFileUpload {
            filename,
            content_type,
        };
        let upload: FileUploadObject = self
            .send(|| self.client.post(url.clone()).json(&body))
            .await?;

        let send_url = self.endpoint(&format!("file_uploads/{}/send", upload.id))?;
        let _: Ignored = self
            .send(|| {
                let part = multipart::Part::bytes(bytes.clone()).file_name(filename.to_owned());
                let part = part.mime_str(content_type).unwrap_or_else(|_| {
                    multipart::Part::bytes(bytes.clone()).file_name(filename.to_owned())
                });
                self.client
                    .post(send_url.clone())
                    .multipart(multipart::Form::new().part("file", part))
            })
            .await?;
        debug!(upload_id = %upload.id, filename, size = bytes.len(), "uploaded file");
        Ok(upload.id)
    }

    async fn list_comments(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<Paginated<Comment>, store::Error> {
        let url = self.endpoint("comments")?;
        let mut query = paged_query(cursor);
        query.push(("block_id", block_id));
        let list: List<CommentObject> = self
            .send(|| self.client.get(url.clone()).query(&query))
            .await?;
        Ok(list.map(|comment| Comment {
            id: comment.id,
            discussion_id: comment.discussion_id,
            created_time: comment.created_time,
            created_by: comment.created_by.id,
            text: plain_text(&comment.rich_text),
        }))
    }

    async fn me(&self) -> Result<BotUser, store::Error> {
        let url = self.endpoint("users/me")?;
        let user: UserObject = self.send(|| self.client.get(url.clone())).await?;
        Ok(BotUser {
            id: user.id,
            name: user.name,
        })
    }
}
