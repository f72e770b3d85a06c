use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};

use save_to_ink::models::Article;
use save_to_ink::{ArticleService, Config, Repository};

const USAGE: &str = "usage: save-to-ink <command>

commands:
  add <url>               save an article (and send it when sending is enabled)
  send <id>               retry delivery of a saved article
  list [page] [size]      list saved articles, newest first
  show <id>               print a saved article as JSON
  delete <id>             delete one article
  delete-all              delete every article of the configured account
  export <url> <path>     write an EPUB for <url> without saving it";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{USAGE}");
        return Ok(());
    };
    let arg = |i: usize, name: &str| {
        args.get(i)
            .map(String::as_str)
            .with_context(|| format!("missing <{name}>\n\n{USAGE}"))
    };

    let config = Config::load().context("failed to load configuration")?;
    let store = Repository::new(&config.db_path, config.store.clone())
        .await
        .with_context(|| format!("failed to open database at {}", config.db_path))?;
    let service = ArticleService::from_config(&config, Arc::new(store))?;
    let account = config.account.as_str();

    match command {
        "add" => {
            let result = service.create_article(arg(1, "url")?, account).await?;
            println!("{}", result.message);
            print_summary(&result.article);
        }
        "send" => {
            let article = service.resend_article(account, arg(1, "id")?).await?;
            print_summary(&article);
        }
        "list" => {
            let page = parse_number(args.get(1), 1)?;
            let page_size = parse_number(args.get(2), i64::from(config.store.default_page_size))?;
            let listing = service.list_articles(account, page, page_size).await?;
            for article in &listing.items {
                print_summary(article);
            }
            println!(
                "page {} ({} per page), {} total{}",
                listing.page,
                listing.page_size,
                listing.total,
                if listing.has_more { ", more available" } else { "" }
            );
        }
        "show" => {
            let article = service.get_article(account, arg(1, "id")?).await?;
            println!("{}", serde_json::to_string_pretty(&article)?);
        }
        "delete" => {
            let deleted = service.delete_article(account, arg(1, "id")?).await?;
            println!("deleted {deleted} article(s)");
        }
        "delete-all" => {
            let deleted = service.delete_all_articles(account).await?;
            println!("deleted {deleted} article(s)");
        }
        "export" => {
            let result = service.process(arg(1, "url")?).await?;
            let path = PathBuf::from(arg(2, "path")?);
            service.write_to_file(&result, &path)?;
            println!("wrote {:?}", path);
        }
        other => bail!("unknown command {other:?}\n\n{USAGE}"),
    }

    Ok(())
}

fn parse_number(value: Option<&String>, default: i64) -> anyhow::Result<i64> {
    match value {
        Some(v) => v.parse().with_context(|| format!("not a number: {v}")),
        None => Ok(default),
    }
}

fn print_summary(article: &Article) {
    println!(
        "{}  [{}]  {}  {}",
        article.id,
        article.delivery_status(),
        article.display_title(),
        article.url
    );
}
