//! Loading application configuration (tutor prompts + optional lesson bank)
//! from TOML.
//!
//! See `AppConfig` and `Prompts` for the expected schema.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::{Difficulty, ExamTarget, Lesson, LessonStatus};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub lessons: Vec<LessonCfg>,
}

/// Lesson entry accepted in TOML configuration. The bank is only seeded into
/// an empty lessons collection, so a restored document always wins.
#[derive(Clone, Debug, Deserialize)]
pub struct LessonCfg {
  pub title: String,
  pub category: String,
  #[serde(default)] pub exam_target: Option<ExamTarget>,
  pub difficulty: Difficulty,
  #[serde(default)] pub base_points: Option<u32>,
  #[serde(default)] pub estimated_time_minutes: Option<u32>,
}

impl LessonCfg {
  pub fn to_lesson(&self) -> Lesson {
    Lesson {
      title: self.title.clone(),
      category: self.category.clone(),
      exam_target: self.exam_target.unwrap_or(ExamTarget::General),
      difficulty: self.difficulty,
      base_points: self.base_points.unwrap_or(10),
      estimated_time_minutes: self.estimated_time_minutes.unwrap_or(15),
      created_by_teacher_id: None,
      prerequisites: Default::default(),
      status: LessonStatus::Active,
    }
  }
}

/// Prompts used by the AI tutor flows. Defaults are sensible for Brazilian
/// ENEM/UFPR English preparation; override them in TOML to tune tone.
#[derive(Clone, Debug, Deserialize)]
pub struct Prompts {
  /// System framing sent to every provider.
  pub tutor_system: String,
  /// Lesson-content generation, filled with {title}/{category}/{difficulty}/{exam_target}.
  pub lesson_content_user_template: String,
  /// Topic summary for the student assistant, filled with {topic}/{level}.
  pub summary_user_template: String,
  /// Free-form Q&A, filled with {question} plus {level}/{points} when a student is logged in.
  pub question_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      tutor_system: "You are an English language tutor specialized in helping Brazilian students prepare for ENEM and UFPR entrance exams. Provide clear, educational responses in Portuguese.".into(),
      lesson_content_user_template: "Crie uma lição completa de inglês sobre \"{title}\" para a categoria {category}.\nNível de dificuldade: {difficulty}\nTipo de vestibular: {exam_target}\n\nA lição deve incluir:\n1. Introdução ao tópico\n2. Explicação clara com exemplos\n3. Exercícios práticos\n4. Dicas específicas para o vestibular brasileiro\n5. Vocabulário importante\n\nFormate em markdown e seja educativo e engajante.".into(),
      summary_user_template: "Crie um resumo educacional sobre \"{topic}\" para estudantes brasileiros de nível {level} se preparando para vestibulares (ENEM/UFPR).\n\nO resumo deve incluir:\n1. Conceitos fundamentais\n2. Exemplos práticos\n3. Dicas para vestibulares\n4. Exercícios rápidos\n5. Vocabulário importante\n\nSeja claro, didático e focado no contexto brasileiro.".into(),
      question_user_template: "Responda esta pergunta de forma clara e educativa:\n\n\"{question}\"\n\nContexto do aluno:\n- Nível atual: {level}\n- Pontos: {points}\n- Foco: Vestibulares brasileiros\n\nForneça uma resposta didática com exemplos práticos.".into(),
    }
  }
}

/// Attempt to load `AppConfig` from EDUDASH_CONFIG_PATH. On any parsing/IO
/// error, returns None.
pub fn load_app_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("EDUDASH_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AppConfig>(&s) {
      Ok(cfg) => {
        info!(target: "edudash_backend", %path, "Loaded app config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "edudash_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "edudash_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lesson_bank_entry_fills_defaults() {
    let cfg: AppConfig = toml::from_str(
      r#"
        [[lessons]]
        title = "Linking Words"
        category = "grammar"
        difficulty = "medium"
      "#,
    )
    .expect("parse");
    let lesson = cfg.lessons[0].to_lesson();
    assert_eq!(lesson.base_points, 10);
    assert_eq!(lesson.exam_target, ExamTarget::General);
    assert_eq!(lesson.status, LessonStatus::Active);
    assert!(lesson.created_by_teacher_id.is_none());
  }
}
