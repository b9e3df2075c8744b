use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use custom_summary_core::host::{self, SqliteConversation, SqliteSettings, SummaryOutcome};
use custom_summary_core::{db, server, summary::SummaryClient, telemetry};

/**
 * \brief CLI 程序入口：管理总结设置、会话，并触发“生成总结”。
 */
#[derive(Parser, Debug)]
#[command(name = "custom-summary", version, about = "Summarize conversations with a custom API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 保存总结服务设置。
     * \param api_url 总结服务地址
     * \param api_key 总结服务密钥（可选）
     */
    Configure {
        #[arg(long)]
        api_url: String,
        #[arg(long, default_value = "")]
        api_key: String,
        #[arg(long, default_value_t = false)]
        enable_telemetry: bool,
    },

    /** \brief 显示当前设置（密钥打码）。 */
    Settings,

    /** \brief 新建会话。 */
    NewChat {
        #[arg(long)]
        title: String,
    },

    /** \brief 向会话追加一条消息。 */
    Add {
        #[arg(long)]
        chat_id: i64,
        #[arg(long, default_value = "user")]
        role: String,
        #[arg(long)]
        content: String,
    },

    /** \brief 为会话生成总结并写回。 */
    Summarize {
        #[arg(long)]
        chat_id: i64,
    },

    /** \brief 启动本地 HTTP 服务。 */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5180")]
        addr: String,
    },
}

fn mask_key(key: &str) -> String {
    let count = key.chars().count();
    if count == 0 {
        "(未设置)".to_string()
    } else if count <= 4 {
        "*".repeat(count)
    } else {
        let tail: String = key.chars().skip(count - 4).collect();
        format!("{}{}", "*".repeat(count - 4), tail)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let db_path = db::default_db_path();
    let conn = db::open_db(&db_path).context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    telemetry::set_enabled(db::get_telemetry_enabled(&conn).unwrap_or(false));

    match cli.command {
        Commands::Configure {
            api_url,
            api_key,
            enable_telemetry,
        } => {
            let saved = db::save_summary_settings(&conn, &api_url, &api_key)
                .context("save settings failed")?;
            db::set_telemetry_enabled(&conn, enable_telemetry).context("save telemetry failed")?;
            telemetry::set_enabled(enable_telemetry);
            println!("设置已保存 (api_url={} api_key={})", saved.api_url, mask_key(&saved.api_key));
        }
        Commands::Settings => {
            let settings = db::get_summary_settings(&conn).context("load settings failed")?;
            println!("api_url: {}", settings.api_url);
            println!("api_key: {}", mask_key(&settings.api_key));
            println!(
                "telemetry: {}",
                db::get_telemetry_enabled(&conn).context("load telemetry failed")?
            );
        }
        Commands::NewChat { title } => {
            let id = db::create_chat(&conn, &title).context("create chat failed")?;
            println!("Created chat id={}", id);
        }
        Commands::Add {
            chat_id,
            role,
            content,
        } => {
            let id = db::insert_message(&conn, chat_id, &role, &content)
                .context("insert message failed")?;
            println!("Added message id={} to chat {}", id, chat_id);
        }
        Commands::Summarize { chat_id } => {
            if !db::chat_exists(&conn, chat_id).context("load chat failed")? {
                anyhow::bail!("chat id {} not found", chat_id);
            }
            drop(conn);
            println!("正在生成总结...");
            let settings = SqliteSettings::new(db_path.clone());
            let conversation = SqliteConversation::new(db_path, chat_id);
            let outcome = host::generate_summary(
                &SummaryClient::new(),
                &settings,
                &conversation,
                &conversation,
            )
            .await
            .context("generate summary failed")?;
            match outcome {
                SummaryOutcome::Updated(text) => {
                    println!("总结已更新:\n{}", text);
                }
                SummaryOutcome::Unchanged => {
                    eprintln!("warning: 总结服务返回了空内容，未更新总结");
                }
                SummaryOutcome::Failed(err) if err.is_warning() => {
                    eprintln!("warning: {}", err);
                }
                SummaryOutcome::Failed(err) => {
                    return Err(err).context("summary request failed");
                }
            }
        }
        Commands::Serve { addr } => {
            drop(conn);
            server::run(&addr).await?;
        }
    }

    Ok(())
}
