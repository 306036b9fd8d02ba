//! Redis-backed job and product store.
//!
//! Job records are hashes; every transition runs as one Lua script that
//! updates the job hash, the status index sets, the open-job index and the
//! product hash together.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use reel_models::{
    CompositionOutput, GeneratedContent, ImageRef, ImageSource, Job, JobId, JobStatus, JobType,
    MusicId, MusicTrack, Product, ProductId, ProductStatus, StatusCounts, TemplateId,
    VideoTemplate,
};

use crate::error::{StoreError, StoreResult};
use crate::keys::{Keys, StoreConfig};
use crate::store::{InsertOutcome, JobStore, ProductStore, Transition};

const INSERT_SCRIPT: &str = r#"
local existing = redis.call('GET', KEYS[1])
if existing then
    local status = redis.call('HGET', ARGV[1] .. existing, 'status')
    if status == 'waiting' or status == 'active' then
        return existing
    end
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('HSET', KEYS[2], unpack(ARGV, 5))
redis.call('SADD', KEYS[3], ARGV[2])
if redis.call('EXISTS', KEYS[4]) == 1 then
    redis.call('HSET', KEYS[4], 'status', ARGV[3], 'progress', 0, 'updated_at', ARGV[4])
    redis.call('HDEL', KEYS[4], 'error')
end
return ''
"#;

// KEYS: job, product, open
// ARGV: status set prefix, kind, now, product status, progress, error, result
const TRANSITION_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return -1
end
if status == 'completed' or status == 'failed' then
    return 0
end

local kind = ARGV[2]
local now = ARGV[3]
local id = redis.call('HGET', KEYS[1], 'id')
local product = redis.call('EXISTS', KEYS[2]) == 1

local function move(to)
    redis.call('SREM', ARGV[1] .. status, id)
    redis.call('SADD', ARGV[1] .. to, id)
    redis.call('HSET', KEYS[1], 'status', to, 'updated_at', now)
end

local function release()
    if redis.call('GET', KEYS[3]) == id then
        redis.call('DEL', KEYS[3])
    end
end

if kind == 'activate' then
    move('active')
    redis.call('HINCRBY', KEYS[1], 'attempts', 1)
    redis.call('HSET', KEYS[1], 'started_at', now)
    if product then
        local progress = redis.call('HGET', KEYS[1], 'progress') or '0'
        redis.call('HSET', KEYS[2], 'status', ARGV[4], 'progress', progress, 'updated_at', now)
    end
elseif kind == 'progress' then
    if status ~= 'active' then
        return 0
    end
    local current = tonumber(redis.call('HGET', KEYS[1], 'progress') or '0')
    local value = tonumber(ARGV[5])
    if value <= current then
        return 0
    end
    redis.call('HSET', KEYS[1], 'progress', value, 'updated_at', now)
    if product then
        redis.call('HSET', KEYS[2], 'progress', value, 'updated_at', now)
    end
elseif kind == 'complete' then
    move('completed')
    redis.call('HSET', KEYS[1], 'progress', 100, 'completed_at', now)
    redis.call('HDEL', KEYS[1], 'error')
    if ARGV[7] ~= '' then
        redis.call('HSET', KEYS[1], 'result', ARGV[7])
    end
    release()
    if product then
        redis.call('HSET', KEYS[2], 'status', ARGV[4], 'progress', 100, 'updated_at', now)
        redis.call('HDEL', KEYS[2], 'error')
    end
elseif kind == 'retry' then
    move('waiting')
    redis.call('HSET', KEYS[1], 'error', ARGV[6])
    if product then
        redis.call('HSET', KEYS[2], 'status', ARGV[4], 'error', ARGV[6], 'updated_at', now)
    end
elseif kind == 'fail' then
    move('failed')
    redis.call('HSET', KEYS[1], 'error', ARGV[6], 'completed_at', now)
    release()
    if product then
        redis.call('HSET', KEYS[2], 'status', ARGV[4], 'error', ARGV[6], 'updated_at', now)
    end
else
    return redis.error_reply('unknown transition ' .. kind)
end
return 1
"#;

const SET_FIELD_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2], 'updated_at', ARGV[3])
return 1
"#;

/// Job and product store on Redis.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    keys: Keys,
    insert_script: Script,
    transition_script: Script,
    set_field_script: Script,
}

impl RedisStore {
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            keys: Keys::new(config.prefix),
            insert_script: Script::new(INSERT_SCRIPT),
            transition_script: Script::new(TRANSITION_SCRIPT),
            set_field_script: Script::new(SET_FIELD_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env())
    }

    async fn conn(&self) -> StoreResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Store a template document.
    pub async fn put_template(&self, template: &VideoTemplate) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(template)?;
        conn.set::<_, _, ()>(self.keys.template(&template.id), json)
            .await?;
        Ok(())
    }

    /// Store a music track document.
    pub async fn put_music(&self, track: &MusicTrack) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(track)?;
        conn.set::<_, _, ()>(self.keys.music(&track.id), json).await?;
        Ok(())
    }

    async fn set_product_field(
        &self,
        id: &ProductId,
        field: &str,
        value: String,
    ) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let set: i32 = self
            .set_field_script
            .key(self.keys.product(id))
            .arg(field)
            .arg(value)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        if set == 0 {
            return Err(StoreError::not_found(format!("product {}", id)));
        }
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: String) -> StoreResult<Option<T>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(&key).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(StoreError::from))
            .transpose()
    }
}

fn images_field(source: ImageSource) -> &'static str {
    match source {
        ImageSource::Scraped => "images:scraped",
        ImageSource::Search => "images:search",
        ImageSource::Generated => "images:generated",
        ImageSource::Uploaded => "images:uploaded",
    }
}

const IMAGE_SOURCES: [ImageSource; 4] = [
    ImageSource::Scraped,
    ImageSource::Search,
    ImageSource::Generated,
    ImageSource::Uploaded,
];

fn job_to_fields(job: &Job) -> StoreResult<Vec<(&'static str, String)>> {
    let mut fields = vec![
        ("id", job.id.to_string()),
        ("job_type", job.job_type.to_string()),
        ("subject_id", job.subject_id.to_string()),
        ("priority", job.priority.to_string()),
        ("attempts", job.attempts.to_string()),
        ("max_attempts", job.max_attempts.to_string()),
        ("status", job.status.to_string()),
        ("progress", job.progress.to_string()),
        ("created_at", job.created_at.to_rfc3339()),
        ("updated_at", job.updated_at.to_rfc3339()),
    ];
    if let Some(error) = &job.error {
        fields.push(("error", error.clone()));
    }
    if let Some(result) = &job.result {
        fields.push(("result", serde_json::to_string(result)?));
    }
    if let Some(t) = job.started_at {
        fields.push(("started_at", t.to_rfc3339()));
    }
    if let Some(t) = job.completed_at {
        fields.push(("completed_at", t.to_rfc3339()));
    }
    Ok(fields)
}

fn required<'a>(map: &'a HashMap<String, String>, key: &str, field: &str) -> StoreResult<&'a str> {
    map.get(field)
        .map(String::as_str)
        .ok_or_else(|| StoreError::corrupt(key, format!("missing field {}", field)))
}

fn parse_number<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, field: &str) -> StoreResult<T> {
    required(map, key, field)?
        .parse()
        .map_err(|_| StoreError::corrupt(key, format!("invalid {}", field)))
}

fn parse_time(map: &HashMap<String, String>, key: &str, field: &str) -> StoreResult<Option<DateTime<Utc>>> {
    map.get(field)
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| StoreError::corrupt(key, format!("invalid {}", field)))
        })
        .transpose()
}

fn job_from_fields(key: &str, map: &HashMap<String, String>) -> StoreResult<Job> {
    let job_type: JobType = required(map, key, "job_type")?
        .parse()
        .map_err(|e: reel_models::ParseJobTypeError| StoreError::corrupt(key, e.to_string()))?;
    let status: JobStatus = required(map, key, "status")?
        .parse()
        .map_err(|e: String| StoreError::corrupt(key, e))?;
    let result = map
        .get("result")
        .map(|s| serde_json::from_str(s))
        .transpose()?;

    Ok(Job {
        id: JobId::from_string(required(map, key, "id")?),
        job_type,
        subject_id: ProductId::from_string(required(map, key, "subject_id")?),
        priority: parse_number(map, key, "priority")?,
        attempts: parse_number(map, key, "attempts")?,
        max_attempts: parse_number(map, key, "max_attempts")?,
        status,
        progress: parse_number(map, key, "progress")?,
        error: map.get("error").cloned(),
        result,
        created_at: parse_time(map, key, "created_at")?
            .ok_or_else(|| StoreError::corrupt(key, "missing field created_at"))?,
        updated_at: parse_time(map, key, "updated_at")?
            .ok_or_else(|| StoreError::corrupt(key, "missing field updated_at"))?,
        started_at: parse_time(map, key, "started_at")?,
        completed_at: parse_time(map, key, "completed_at")?,
    })
}

fn product_from_fields(key: &str, map: &HashMap<String, String>) -> StoreResult<Product> {
    let mut product: Product = serde_json::from_str(required(map, key, "doc")?)?;

    if let Some(status) = map.get("status") {
        product.status = status
            .parse::<ProductStatus>()
            .map_err(|e| StoreError::corrupt(key, e))?;
    }
    if let Some(progress) = map.get("progress") {
        product.progress = progress.parse().unwrap_or(product.progress);
    }
    product.error = map.get("error").cloned();
    if let Some(content) = map.get("content") {
        product.content = Some(serde_json::from_str(content)?);
    }
    for source in IMAGE_SOURCES {
        if let Some(raw) = map.get(images_field(source)) {
            *product.images.source_mut(source) = serde_json::from_str(raw)?;
        }
    }
    if let Some(video) = map.get("video") {
        product.video = Some(serde_json::from_str(video)?);
    }
    if let Some(updated) = parse_time(map, key, "updated_at")? {
        product.updated_at = updated;
    }
    Ok(product)
}

#[async_trait]
impl JobStore for RedisStore {
    async fn find_open(&self, subject: &ProductId, job_type: JobType) -> StoreResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let id: Option<String> = conn.get(self.keys.open(job_type, subject)).await?;
        let Some(id) = id else {
            return Ok(None);
        };
        let job = self.get(&JobId::from_string(id)).await?;
        Ok(job.filter(Job::is_open))
    }

    async fn insert(&self, job: &Job) -> StoreResult<InsertOutcome> {
        let mut conn = self.conn().await?;
        let mut invocation = self.insert_script.prepare_invoke();
        invocation
            .key(self.keys.open(job.job_type, &job.subject_id))
            .key(self.keys.job(&job.id))
            .key(self.keys.status(job.job_type, JobStatus::Waiting))
            .key(self.keys.product(&job.subject_id))
            .arg(self.keys.job_prefix())
            .arg(job.id.as_str())
            .arg(ProductStatus::for_job(job.job_type, JobStatus::Waiting).as_str())
            .arg(job.updated_at.to_rfc3339());
        for (field, value) in job_to_fields(job)? {
            invocation.arg(field).arg(value);
        }

        let existing: String = invocation.invoke_async(&mut conn).await?;
        if existing.is_empty() {
            debug!(job_id = %job.id, job_type = %job.job_type, "Inserted job record");
            Ok(InsertOutcome::Created)
        } else {
            Ok(InsertOutcome::Duplicate(JobId::from_string(existing)))
        }
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let key = self.keys.job(id);
        let map: HashMap<String, String> = conn.hgetall(&key).await?;
        if map.is_empty() {
            return Ok(None);
        }
        job_from_fields(&key, &map).map(Some)
    }

    async fn transition(&self, id: &JobId, transition: Transition) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let job_key = self.keys.job(id);

        // job_type and subject_id never change after insert
        let (job_type, subject): (Option<String>, Option<String>) =
            conn.hget(&job_key, &["job_type", "subject_id"]).await?;
        let (Some(job_type), Some(subject)) = (job_type, subject) else {
            return Err(StoreError::not_found(format!("job {}", id)));
        };
        let job_type: JobType = job_type
            .parse()
            .map_err(|e: reel_models::ParseJobTypeError| StoreError::corrupt(&job_key, e.to_string()))?;
        let subject = ProductId::from_string(subject);

        let product_status = ProductStatus::for_job(job_type, transition.target_status());
        let (progress, error, result) = match &transition {
            Transition::Progress(p) => ((*p).min(100), String::new(), String::new()),
            Transition::Complete(Some(value)) => (100, String::new(), serde_json::to_string(value)?),
            Transition::Retry(e) => (0, e.clone(), String::new()),
            Transition::Fail(e) if e.trim().is_empty() => (0, "unknown error".to_string(), String::new()),
            Transition::Fail(e) => (0, e.clone(), String::new()),
            _ => (0, String::new(), String::new()),
        };

        let applied: i64 = self
            .transition_script
            .key(&job_key)
            .key(self.keys.product(&subject))
            .key(self.keys.open(job_type, &subject))
            .arg(self.keys.status_prefix(job_type))
            .arg(transition.name())
            .arg(Utc::now().to_rfc3339())
            .arg(product_status.as_str())
            .arg(progress)
            .arg(error)
            .arg(result)
            .invoke_async(&mut conn)
            .await?;

        match applied {
            -1 => Err(StoreError::not_found(format!("job {}", id))),
            0 => Ok(false),
            _ => {
                counter!("reel_store_transitions_total", "transition" => transition.name())
                    .increment(1);
                if transition.target_status().is_terminal() {
                    info!(job_id = %id, status = %transition.target_status(), "Job reached terminal status");
                }
                Ok(true)
            }
        }
    }

    async fn counts(&self, job_type: JobType) -> StoreResult<StatusCounts> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for status in JobStatus::ALL {
            pipe.scard(self.keys.status(job_type, *status));
        }
        let sizes: Vec<u64> = pipe.query_async(&mut conn).await?;

        let mut counts = StatusCounts::default();
        for (status, n) in JobStatus::ALL.iter().zip(sizes) {
            counts.add(*status, n);
        }
        Ok(counts)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl ProductStore for RedisStore {
    async fn get_product(&self, id: &ProductId) -> StoreResult<Option<Product>> {
        let mut conn = self.conn().await?;
        let key = self.keys.product(id);
        let map: HashMap<String, String> = conn.hgetall(&key).await?;
        if map.is_empty() {
            return Ok(None);
        }
        product_from_fields(&key, &map).map(Some)
    }

    async fn put_product(&self, product: &Product) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let key = self.keys.product(&product.id);

        let mut fields: Vec<(&str, String)> = vec![
            ("doc", serde_json::to_string(product)?),
            ("status", product.status.as_str().to_string()),
            ("progress", product.progress.to_string()),
            ("updated_at", product.updated_at.to_rfc3339()),
        ];
        if let Some(error) = &product.error {
            fields.push(("error", error.clone()));
        }
        if let Some(content) = &product.content {
            fields.push(("content", serde_json::to_string(content)?));
        }
        if let Some(video) = &product.video {
            fields.push(("video", serde_json::to_string(video)?));
        }
        let mut images = product.images.clone();
        for source in IMAGE_SOURCES {
            fields.push((
                images_field(source),
                serde_json::to_string(images.source_mut(source))?,
            ));
        }

        let mut pipe = redis::pipe();
        pipe.atomic().del(&key).ignore().hset_multiple(&key, &fields).ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn save_content(&self, id: &ProductId, content: &GeneratedContent) -> StoreResult<()> {
        self.set_product_field(id, "content", serde_json::to_string(content)?)
            .await
    }

    async fn add_images(
        &self,
        id: &ProductId,
        source: ImageSource,
        refs: &[ImageRef],
    ) -> StoreResult<usize> {
        let mut conn = self.conn().await?;
        let key = self.keys.product(id);
        let field = images_field(source);

        // One open job per (product, type) keeps this read-modify-write single-writer.
        let raw: Option<String> = conn.hget(&key, field).await?;
        let mut images = reel_models::ProductImages::default();
        if let Some(raw) = raw {
            *images.source_mut(source) = serde_json::from_str(&raw)?;
        }
        let added = images.add(source, refs.iter().cloned());
        if added > 0 {
            let json = serde_json::to_string(images.source_mut(source))?;
            self.set_product_field(id, field, json).await?;
        }
        Ok(added)
    }

    async fn save_video(&self, id: &ProductId, output: &CompositionOutput) -> StoreResult<()> {
        self.set_product_field(id, "video", serde_json::to_string(output)?)
            .await
    }

    async fn get_template(&self, id: &TemplateId) -> StoreResult<Option<VideoTemplate>> {
        self.get_json(self.keys.template(id)).await
    }

    async fn get_music(&self, id: &MusicId) -> StoreResult<Option<MusicTrack>> {
        self.get_json(self.keys.music(id)).await
    }
}
