use chrono::{DateTime, Utc};

use crate::app::{AppContext, PostflowError, Result};
use crate::cli::due::{format_until, parse_due};
use crate::cli::{OperatorCommand, PostAction, TopicAction};
use crate::domain::{NewPost, Page, Post, PostStatus};
use crate::generator::Style;
use crate::lock::SchedulerLock;
use crate::splitter;
use crate::store::Store;

/// Whether the command changes post lifecycle state. Those must go through
/// the running scheduler when there is one, or its jobs would drift.
pub fn is_mutating(command: &OperatorCommand) -> bool {
    match command {
        OperatorCommand::Post { action } => !matches!(
            action,
            PostAction::Show { .. }
                | PostAction::List { .. }
                | PostAction::Scheduled
                | PostAction::Stats
        ),
        OperatorCommand::Generate { save, .. } => *save,
        OperatorCommand::Topic { .. } => false,
    }
}

/// Run one command outside the scheduler process.
///
/// Whoever holds the scheduler lock owns publishing: with the lock we settle
/// due posts first, without it we may only read.
pub async fn run_once(ctx: &AppContext, command: OperatorCommand) -> Result<()> {
    let lock = SchedulerLock::try_acquire(&ctx.lock_path()?)?;
    match &lock {
        Some(_) => {
            ctx.coordinator.rehydrate().await?;
        }
        None if is_mutating(&command) => {
            return Err(PostflowError::Other(
                "Another postflow process owns the schedule; type this command on the \
                 scheduler's console or stop it first"
                    .to_string(),
            ));
        }
        None => tracing::debug!("Another process owns the schedule; skipping rehydration"),
    }

    let result = execute(ctx, command).await;
    ctx.shutdown();
    drop(lock);
    result
}

pub async fn execute(ctx: &AppContext, command: OperatorCommand) -> Result<()> {
    match command {
        OperatorCommand::Post { action } => post(ctx, action).await,
        OperatorCommand::Topic { action } => topic(ctx, action),
        OperatorCommand::Generate {
            topic,
            improve,
            style,
            save,
            prompt,
        } => generate(ctx, topic, improve, style, save, prompt.join(" ")).await,
    }
}

fn due_from(ctx: &AppContext, input: &str) -> Result<DateTime<Utc>> {
    parse_due(input, ctx.coordinator.now()).map_err(PostflowError::Validation)
}

async fn post(ctx: &AppContext, action: PostAction) -> Result<()> {
    let coordinator = &ctx.coordinator;

    match action {
        PostAction::New { media, at, content } => {
            let mut new = NewPost::new(content.join(" "));
            if let Some(path) = media {
                new = new.with_media(path);
            }
            if let Some(at) = at {
                new = new.due_at(due_from(ctx, &at)?);
            }
            let post = coordinator.create(new).await?;
            println!("Created post #{} ({})", post.id, describe_status(ctx, &post));
        }
        PostAction::Edit { id, content } => {
            let post = coordinator.edit(id, content.join(" ")).await?;
            println!("Updated post #{}", post.id);
        }
        PostAction::Show { id } => show_post(ctx, id)?,
        PostAction::List {
            status,
            page,
            limit,
        } => {
            let page = Page::number(page, limit);
            let posts = match status {
                Some(status) => coordinator.list(status, page)?,
                None => coordinator.recent(page)?,
            };
            print_posts(&posts);
        }
        PostAction::Scheduled => print_posts(&coordinator.scheduled()?),
        PostAction::Schedule { id, at } => {
            let post = coordinator.schedule(id, due_from(ctx, &at)?).await?;
            println!("Post #{} {}", post.id, describe_status(ctx, &post));
        }
        PostAction::Reschedule { id, at } => {
            let post = coordinator.reschedule(id, due_from(ctx, &at)?).await?;
            println!("Post #{} {}", post.id, describe_status(ctx, &post));
        }
        PostAction::Cancel { id } => {
            coordinator.cancel(id).await?;
            println!("Post #{} cancelled and returned to drafts", id);
        }
        PostAction::Publish { id } => {
            let post = coordinator.publish_now(id).await?;
            match post.status {
                PostStatus::Published => println!(
                    "Published post #{} (id {})",
                    post.id,
                    post.platform_id.as_deref().unwrap_or("?")
                ),
                _ => eprintln!(
                    "Post #{} failed: {}",
                    post.id,
                    post.error_detail.as_deref().unwrap_or("unknown error")
                ),
            }
        }
        PostAction::Delete { id } => {
            coordinator.delete(id).await?;
            println!("Deleted post #{}", id);
        }
        PostAction::Stats => {
            let stats = coordinator.stats()?;
            println!("Drafts:     {}", stats.draft);
            println!("Scheduled:  {}", stats.scheduled);
            println!("Published:  {}", stats.published);
            println!("Failed:     {}", stats.failed);
            println!("Total:      {}", stats.total());
        }
    }
    Ok(())
}

fn describe_status(ctx: &AppContext, post: &Post) -> String {
    match (post.status, post.scheduled_at) {
        (PostStatus::Scheduled, Some(due)) => format!(
            "scheduled for {} ({})",
            due.format("%Y-%m-%d %H:%M UTC"),
            format_until(due, ctx.coordinator.now())
        ),
        (status, _) => status.to_string(),
    }
}

fn print_posts(posts: &[Post]) {
    if posts.is_empty() {
        println!("No posts");
        return;
    }

    for post in posts {
        let when = match post.status {
            PostStatus::Scheduled => post.scheduled_at,
            PostStatus::Published => post.published_at,
            _ => Some(post.updated_at),
        };
        let when = when
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let media = if post.has_media() { " [media]" } else { "" };
        println!(
            "#{:<5} {:<10} {:<16} {}{}",
            post.id,
            post.status,
            when,
            post.preview(50).replace('\n', " "),
            media
        );
    }
}

fn show_post(ctx: &AppContext, id: i64) -> Result<()> {
    let post = ctx.coordinator.get(id)?;

    println!("Post #{}", post.id);
    println!("Status:    {}", describe_status(ctx, &post));
    if let Some(published) = post.published_at {
        println!("Published: {}", published.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(platform_id) = &post.platform_id {
        println!("Platform:  {}", platform_id);
    }
    if let Some(media) = &post.media_ref {
        println!("Media:     {}", media.display());
    }
    if let Some(prompt) = &post.ai_prompt {
        println!("AI prompt: {}", prompt);
    }
    if let Some(error) = &post.error_detail {
        println!("Error:     {}", error);
    }
    println!("Created:   {}", post.created_at.format("%Y-%m-%d %H:%M UTC"));
    println!();

    let segments = ctx.coordinator.segments(id)?;
    if segments.is_empty() {
        let preview = ctx.coordinator.preview_split(&post);
        if preview.len() > 1 {
            println!("Will publish as a {}-part thread:", preview.len());
        }
        for segment in preview {
            println!("{}", segment);
            println!("---");
        }
    } else {
        println!("Published segments:");
        for segment in segments {
            println!("[{}] {} (id {})", segment.position, segment.content, segment.platform_id);
        }
    }
    Ok(())
}

fn topic(ctx: &AppContext, action: TopicAction) -> Result<()> {
    let owner = ctx.operator();

    match action {
        TopicAction::Add { label } => {
            let topic = ctx
                .store
                .add_topic(owner, &label.join(" "), ctx.coordinator.now())?;
            println!("Added topic #{}: {}", topic.id, topic.label);
        }
        TopicAction::List => {
            let topics = ctx.store.topics(owner)?;
            if topics.is_empty() {
                println!("No topics");
            }
            for topic in topics {
                println!("#{:<4} {}", topic.id, topic.label);
            }
        }
        TopicAction::Remove { id } => {
            if !ctx.store.delete_topic(owner, id)? {
                return Err(PostflowError::TopicNotFound(id));
            }
            println!("Removed topic #{}", id);
        }
        TopicAction::Clear => {
            let count = ctx.store.delete_all_topics(owner)?;
            println!("Removed {} topics", count);
        }
    }
    Ok(())
}

async fn generate(
    ctx: &AppContext,
    topic: Option<i64>,
    improve: Option<i64>,
    style: Style,
    save: bool,
    prompt: String,
) -> Result<()> {
    let unit_limit = ctx.coordinator.settings().limits.unit_limit;

    if let Some(id) = improve {
        let post = ctx.coordinator.get(id)?;
        let instruction = if prompt.trim().is_empty() {
            "improve".to_string()
        } else {
            prompt
        };
        let text = ctx.generator.improve(&post.content, &instruction).await?;
        print_generated(&text, unit_limit);
        if save {
            ctx.coordinator.edit(id, text).await?;
            println!("Saved into post #{}", id);
        }
        return Ok(());
    }

    let (text, source) = match topic {
        Some(id) => {
            let topic = ctx
                .store
                .get_topic(ctx.operator(), id)?
                .ok_or(PostflowError::TopicNotFound(id))?;
            let text = ctx.generator.generate_for_topic(&topic.label, unit_limit).await?;
            (text, format!("topic: {}", topic.label))
        }
        None => {
            if prompt.trim().is_empty() {
                return Err(PostflowError::validation("Prompt cannot be empty"));
            }
            let text = ctx
                .generator
                .generate_post(&prompt, Some(unit_limit), style)
                .await?;
            (text, prompt)
        }
    };

    print_generated(&text, unit_limit);
    if save {
        let post = ctx
            .coordinator
            .create(NewPost::new(text).generated_from(source))
            .await?;
        println!("Saved as draft #{}", post.id);
    }
    Ok(())
}

fn print_generated(text: &str, unit_limit: usize) {
    println!("{}", text);
    println!();
    let segments = splitter::split(text, unit_limit).len();
    if segments > 1 {
        println!("({} characters, {} segments)", text.chars().count(), segments);
    } else {
        println!("({} characters)", text.chars().count());
    }
}
