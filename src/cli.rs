use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::DateTime;
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};

use reedline::{DefaultHinter, DefaultPrompt, Reedline, Signal};

use crate::config::{Config, ModelConfig};
use crate::generator::OllamaContentGenerator;
use crate::types::content::{
    Blob, Content, EmbedContent, EmbedContentParameters, GenerateContentConfig,
    GenerateContentParameters, Part, Role,
};

/// 打印帮助信息
fn print_help() {
    println!("🦙 ollama-bridge - 通用内容格式与 Ollama 之间的桥接");
    println!();
    println!("用法：ollama-bridge <命令>");
    println!();
    println!("命令:");
    println!("  chat                        进入交互模式");
    println!("  ask <问题> [--image <路径>]  单轮提问");
    println!("  models                      列出本地模型");
    println!("  embed <文本>...             计算文本向量");
    println!("  onboard                     初始化配置");
    println!("  help                        显示此帮助信息");
    println!();
    println!("环境变量（覆盖配置文件）:");
    println!("  OLLAMA_BASE_URL  OLLAMA_API_KEY  OLLAMA_MODEL");
    println!();
    println!("示例:");
    println!("  ollama-bridge chat");
    println!("  ollama-bridge ask \"图里有什么？\" --image cat.png");
}

fn print_chat_help() {
    println!("命令:");
    println!("  /clear  - 清空对话历史");
    println!("  /quit   - 退出");
    println!();
}

/// 配置文件加环境变量覆盖
fn load_config() -> Result<Config> {
    let mut config = Config::load_default()?;
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

fn generation_config(model: &ModelConfig) -> GenerateContentConfig {
    GenerateContentConfig {
        system_instruction: model.system_prompt.clone().map(Into::into),
        temperature: model.temperature,
        top_p: model.top_p,
        top_k: model.top_k,
        max_output_tokens: model.max_output_tokens,
        ..Default::default()
    }
}

/// 发送一轮对话并流式打印，返回模型的完整回复
async fn stream_turn(
    generator: &OllamaContentGenerator,
    model: &ModelConfig,
    contents: Vec<Content>,
) -> Result<Content> {
    let params = GenerateContentParameters {
        model: model.model.clone(),
        contents,
        config: Some(generation_config(model)),
    };

    let mut stream = generator
        .generate_content_stream(&params)
        .await
        .context("请求模型失败")?;

    let mut text = String::new();
    let mut calls = Vec::new();
    let mut stdout = std::io::stdout();

    while let Some(response) = stream.next().await {
        let response = response?;
        if !response.text.is_empty() {
            print!("{}", response.text);
            stdout.flush()?;
            text.push_str(&response.text);
        }
        for call in response.function_calls.unwrap_or_default() {
            println!(
                "\n🔧 函数调用：{}({})",
                call.name,
                call.args.as_ref().map(|a| a.to_string()).unwrap_or_default()
            );
            calls.push(Part::FunctionCall(call));
        }
    }
    println!();

    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(Part::Text(text));
    }
    parts.extend(calls);

    Ok(Content::new(Role::Model, parts))
}

/// Chat 命令 - 交互式对话
async fn run_chat() -> Result<()> {
    let config = load_config()?;
    let generator = OllamaContentGenerator::from_config(&config.client)?;

    println!("🦙 ollama-bridge");
    println!("🌐 服务：{}", generator.client().base_url());
    println!("🤖 模型：{}", config.model.model);
    println!("输入 /help 查看帮助\n");

    let prompt = DefaultPrompt::default();
    let mut line_editor = Reedline::create().with_hinter(Box::new(DefaultHinter::default()));
    let mut history: Vec<Content> = Vec::new();

    loop {
        let sig = line_editor.read_line(&prompt)?;

        match sig {
            Signal::Success(buffer) => {
                let input = buffer.trim();

                if input.is_empty() {
                    continue;
                }

                if input.starts_with('/') {
                    match input.to_lowercase().as_str() {
                        "/quit" | "/exit" => {
                            println!("👋 再见！");
                            break;
                        }
                        "/clear" => {
                            history.clear();
                            println!("✅ 已清空对话历史\n");
                        }
                        "/help" | "/h" => print_chat_help(),
                        _ => {
                            println!("❌ 未知命令：{}", input);
                            println!("输入 /help 查看帮助\n");
                        }
                    }
                    continue;
                }

                history.push(Content::user_text(input));

                match stream_turn(&generator, &config.model, history.clone()).await {
                    Ok(reply) => {
                        history.push(reply);
                        println!();
                    }
                    Err(e) => {
                        // 失败的一轮不留在历史里
                        history.pop();
                        println!("❌ 错误：{:#}\n", e);
                    }
                }
            }
            Signal::CtrlD => {
                println!("\n👋 再见！");
                break;
            }
            Signal::CtrlC => {
                println!("\n输入 /quit 退出，或继续输入问题");
            }
        }
    }

    Ok(())
}

/// 解析 `ask` 的参数：问题文本和可选的图片路径
fn parse_ask_args(args: &[String]) -> Result<(String, Option<PathBuf>)> {
    let mut words = Vec::new();
    let mut image = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if arg == "--image" || arg == "-i" {
            let Some(path) = iter.next() else {
                bail!("--image 需要一个文件路径");
            };
            image = Some(PathBuf::from(path));
        } else {
            words.push(arg.as_str());
        }
    }

    if words.is_empty() {
        bail!("请输入问题");
    }

    Ok((words.join(" "), image))
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn image_part(path: &Path) -> Result<Part> {
    let bytes =
        std::fs::read(path).with_context(|| format!("读取图片失败：{}", path.display()))?;

    Ok(Part::InlineData(Blob {
        mime_type: mime_for_path(path).to_string(),
        data: STANDARD.encode(bytes),
    }))
}

/// Ask 命令 - 单轮提问
async fn run_ask(args: &[String]) -> Result<()> {
    let (question, image) = parse_ask_args(args)?;
    let config = load_config()?;
    let generator = OllamaContentGenerator::from_config(&config.client)?;

    let mut parts = vec![Part::Text(question)];
    if let Some(path) = image {
        parts.push(image_part(&path)?);
    }

    stream_turn(&generator, &config.model, vec![Content::new(Role::User, parts)]).await?;
    Ok(())
}

/// Models 命令 - 列出本地模型
async fn run_models() -> Result<()> {
    let config = load_config()?;
    let generator = OllamaContentGenerator::from_config(&config.client)?;

    let list = generator
        .client()
        .list_models()
        .await
        .context("获取模型列表失败")?;

    if list.models.is_empty() {
        println!("📭 暂无模型");
        return Ok(());
    }

    println!("📋 模型列表:");
    println!();

    for model in &list.models {
        let modified = DateTime::parse_from_rfc3339(&model.modified_at)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|_| model.modified_at.clone());
        let size = model.size as f64 / 1024.0 / 1024.0 / 1024.0;
        let params = model
            .details
            .as_ref()
            .and_then(|d| d.parameter_size.as_deref())
            .unwrap_or("-");

        println!("{}", model.name);
        println!("   参数：{} | 大小：{:.1} GB | 修改时间：{}", params, size, modified);
        println!();
    }

    Ok(())
}

/// Embed 命令 - 计算文本向量
async fn run_embed(args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("请输入至少一段文本");
    }

    let config = load_config()?;
    let generator = OllamaContentGenerator::from_config(&config.client)?;

    let params = EmbedContentParameters {
        model: config.model.model.clone(),
        contents: args.iter().cloned().map(EmbedContent::Text).collect(),
    };
    let response = generator
        .embed_content(&params)
        .await
        .context("计算向量失败")?;

    for (text, embedding) in args.iter().zip(&response.embeddings) {
        let head: Vec<String> = embedding
            .values
            .iter()
            .take(4)
            .map(|v| format!("{:.4}", v))
            .collect();
        println!("{} → {} 维 [{}, ...]", text, embedding.values.len(), head.join(", "));
    }

    Ok(())
}

/// Onboard 命令 - 写入默认配置
fn run_onboard() -> Result<()> {
    println!("🚀 初始化 ollama-bridge 配置...\n");

    let path = Config::default_path();
    if path.exists() {
        println!("ℹ️  配置已存在：{}", path.display());
        return Ok(());
    }

    Config::default().save(&path).context("保存配置文件失败")?;
    println!("✅ 保存配置：{}", path.display());
    println!();
    println!("你可以:");
    println!("  1. 编辑配置文件修改服务地址和模型");
    println!("  2. 运行 'ollama-bridge chat' 开始对话");

    Ok(())
}

/// 主入口函数
pub async fn run_cli() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let command = args[1].to_lowercase();
    let rest = &args[2..];

    match command.as_str() {
        "chat" | "c" => run_chat().await,
        "ask" => run_ask(rest).await,
        "models" | "ls" => run_models().await,
        "embed" => run_embed(rest).await,
        "onboard" => run_onboard(),
        "help" | "-h" | "--help" | "h" => {
            print_help();
            Ok(())
        }
        _ => {
            eprintln!("❌ 未知命令：{}", command);
            eprintln!();
            eprintln!("运行 'ollama-bridge help' 查看帮助信息");
            std::process::exit(1);
        }
    }
}
