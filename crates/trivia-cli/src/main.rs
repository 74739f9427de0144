// Trivia command-line session host.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not terminal)
// 2. Load config
// 3. Open score store
// 4. Load question pool
// 5. Ask for the player's name
// 6. Play games until the player declines or types /quit

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{error, info};
use trivia_cli::render;
use trivia_core::config::{self, GameConfig};
use trivia_core::model::Player;
use trivia_core::question::{QuestionSource, TextQuestions};
use trivia_core::sqlite::SqliteStore;
use trivia_core::store::ScoreStore;
use trivia_game::game::Game;
use trivia_game::protocol::{GameEvent, GameState, TextMessage};

const CHANNEL_ID: &str = "cli";
const CHANNEL_NAME: &str = "Command Line";
const QUIT: &str = "/quit";

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (log to file, not terminal)
    trivia_cli::init_tracing("trivia.log")?;
    info!("Trivia starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {} rounds of {}s",
        config.game.rounds_per_game,
        config.game.round_duration.as_secs()
    );

    // 3. Open score store
    let store: Arc<dyn ScoreStore> =
        Arc::new(SqliteStore::open(&config.db_path).context("failed to open score store")?);

    // 4. Load question pool
    let questions = TextQuestions::load(&config.questions_path).with_context(|| {
        format!("failed to load questions from {}", config.questions_path.display())
    })?;
    if questions.count() == 0 {
        anyhow::bail!("no questions found in {}", config.questions_path.display());
    }
    let questions: Arc<dyn QuestionSource> = Arc::new(questions);

    // Wrong answers get immediate feedback on a terminal.
    let game_config = GameConfig {
        tick_after_wrong_answer: true,
        ..config.game
    };

    // 5. Ask for the player's name
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let Some(name) = prompt(&mut input, "What's your name? ").await? else {
        return Ok(());
    };
    let name = if name.is_empty() { "Player".to_string() } else { name };
    let player = Player::new(format!("cli:{}", name.to_lowercase()), name.as_str());
    info!("Player {} joined", player.id);

    // 6. Game loop
    loop {
        let Some(answer) = prompt(&mut input, "Ready? (y/n) ").await? else {
            break;
        };
        match answer.to_lowercase().as_str() {
            "y" | "yes" => {}
            "n" | "no" | QUIT => break,
            _ => continue,
        }

        let keep_going = play(
            &game_config,
            questions.clone(),
            store.clone(),
            &player,
            &mut input,
        )
        .await?;
        if !keep_going {
            break;
        }

        match store.player_score(&player.id) {
            Ok(Some(total)) => println!("Your all-time score: {}", total.score),
            Ok(None) => {}
            Err(e) => error!("Failed to read score for {}: {}", player.id, e),
        }
    }

    println!("Bye!");
    info!("Trivia shut down cleanly");
    Ok(())
}

/// Run one game. Returns `false` if the player quit.
async fn play(
    config: &GameConfig,
    questions: Arc<dyn QuestionSource>,
    store: Arc<dyn ScoreStore>,
    player: &Player,
    input: &mut Input,
) -> anyhow::Result<bool> {
    let (events_tx, mut events) = mpsc::channel(64);
    let game = Game::new(CHANNEL_ID, CHANNEL_NAME, config.clone(), questions, store, events_tx)
        .context("failed to start game")?;
    let handle = game.start();
    info!("Game started in channel {}", handle.channel_id());

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Some(text) = render::render_event(&event, &player.id) {
                    print!("{text}");
                    std::io::stdout().flush()?;
                }
                if let GameEvent::State(msg) = &event {
                    if msg.state == GameState::Finished {
                        break;
                    }
                }
            }

            line = input.next_line() => {
                let Some(line) = line? else {
                    return Ok(false);
                };
                let line = line.trim();
                if line == QUIT {
                    return Ok(false);
                }
                if !line.is_empty() {
                    handle.submit(TextMessage::now(player.clone(), line));
                }
            }
        }
    }

    match handle.join().await {
        Ok(rank) => info!("Game over, {} players ranked", rank.len()),
        Err(e) => error!("Game task failed: {}", e),
    }
    Ok(true)
}

async fn prompt(input: &mut Input, question: &str) -> anyhow::Result<Option<String>> {
    print!("{question}");
    std::io::stdout().flush()?;
    Ok(input.next_line().await?.map(|line| line.trim().to_string()))
}
