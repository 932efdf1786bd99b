//! Form builder, publishing and public submissions
//!
//! Questions live in their own table and are ordered by `position`. A form
//! gets its public slug the first time it is published; unpublishing keeps
//! the slug so shared links come back when the form is republished.
//!
//! A submission is checked against the branching logic, scored, and then
//! written as one compensating transaction: response, contact, lead, and the
//! link from response to lead.

use super::subscription::timestamp_cutoff;
use super::{
    clean, is_valid_email, required_text, AuditLogger, ContactService, SubscriptionService,
    TenantContext,
};
use agency_core::logic::{answer_map, FormLogic};
use agency_core::ports::{tables, Query};
use agency_core::scoring::LeadScorer;
use agency_core::{AgencyError, Result, Store, StoreExt, Transaction};
use agency_types::{
    new_id, Answer, AuditAction, ContactInput, Form, FormAnalytics, FormCreate, FormResponse,
    FormSettings, FormStatus, FormUpdate, FormWithQuestions, Lead, LeadQualification, LeadStatus,
    LimitedResource, LogicAction, NextStep, NextStepRequest, Pagination, Question,
    QuestionCreate, QuestionOrder, QuestionType, QuestionUpdate, ResponseSubmission,
    SubmissionReceipt,
};
use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

const MAX_TITLE_LEN: usize = 200;
const MAX_QUESTION_TITLE_LEN: usize = 500;
const MAX_SLUG_BASE_LEN: usize = 48;
const SLUG_SUFFIX_LEN: usize = 6;
const SLUG_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SLUG_ATTEMPTS: usize = 5;

/// Lowercase ASCII words joined by single dashes
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
            if slug.len() >= MAX_SLUG_BASE_LEN {
                break;
            }
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "form".to_string()
    } else {
        slug
    }
}

fn slug_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SLUG_SUFFIX_LEN)
        .map(|_| SLUG_ALPHABET[rng.gen_range(0..SLUG_ALPHABET.len())] as char)
        .collect()
}

/// Contact details picked out of the answers
#[derive(Debug, Default, PartialEq)]
struct Respondent {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

impl Respondent {
    fn from_answers(questions: &[Question], answers: &[Answer]) -> Self {
        let answers = answer_map(answers);
        let mut respondent = Respondent::default();
        for question in questions {
            let Some(text) = answers
                .get(question.id.as_str())
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
            else {
                continue;
            };
            let slot = match question.question_type {
                QuestionType::Email => &mut respondent.email,
                QuestionType::Phone => &mut respondent.phone,
                QuestionType::ShortText if question.title.to_lowercase().contains("name") => {
                    &mut respondent.name
                }
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(text.to_string());
            }
        }
        respondent
    }

    fn split_name(&self) -> (Option<String>, Option<String>) {
        let Some(name) = &self.name else {
            return (None, None);
        };
        match name.split_once(char::is_whitespace) {
            Some((first, last)) => (clean(Some(first.to_string())), clean(Some(last.to_string()))),
            None => (Some(name.clone()), None),
        }
    }
}

/// Hide scoring rules from respondents
fn public_view(mut form: FormWithQuestions) -> FormWithQuestions {
    for question in &mut form.questions {
        question.scoring = None;
        for option in &mut question.options {
            option.score = 0.0;
        }
    }
    form
}

fn validate_settings(settings: &FormSettings) -> Result<()> {
    if let Some(url) = &settings.redirect_url {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AgencyError::Validation(
                "redirect_url must be an http(s) URL".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_question_shape(question: &Question) -> Result<()> {
    if question.question_type.has_options() && question.options.is_empty() {
        return Err(AgencyError::Validation(format!(
            "'{}' needs at least one option",
            question.title
        )));
    }
    Ok(())
}

/// A stored submission and the agency that owns the form
#[derive(Debug, Clone)]
pub struct Submitted {
    pub agency_id: String,
    pub receipt: SubmissionReceipt,
}

fn position_sorted(mut questions: Vec<Question>) -> Vec<Question> {
    questions.sort_by_key(|q| q.position);
    questions
}

pub struct FormService {
    store: Arc<dyn Store>,
    audit: Arc<AuditLogger>,
    subscriptions: Arc<SubscriptionService>,
    contacts: Arc<ContactService>,
    scorer: LeadScorer,
}

impl FormService {
    pub fn new(
        store: Arc<dyn Store>,
        audit: Arc<AuditLogger>,
        subscriptions: Arc<SubscriptionService>,
        contacts: Arc<ContactService>,
        scorer: LeadScorer,
    ) -> Self {
        Self {
            store,
            audit,
            subscriptions,
            contacts,
            scorer,
        }
    }

    async fn load_form(&self, ctx: &TenantContext, id: &str) -> Result<Form> {
        self.store
            .get_as::<Form>(tables::FORMS, id)
            .await?
            .filter(|form| form.agency_id == ctx.agency_id())
            .ok_or_else(|| AgencyError::not_found("Form", id))
    }

    async fn questions_of(&self, form_id: &str) -> Result<Vec<Question>> {
        let query = Query::new()
            .eq("form_id", form_id)
            .order_by("position", true);
        let questions = self.store.select_as(tables::QUESTIONS, &query).await?;
        Ok(position_sorted(questions))
    }

    async fn touch(&self, form_id: &str) -> Result<()> {
        self.store
            .update(tables::FORMS, form_id, json!({ "updated_at": Utc::now() }))
            .await?;
        Ok(())
    }

    /// Published forms must stay publishable after every question edit
    fn check_live_form(form: &Form, candidate: &[Question]) -> Result<()> {
        if form.status != FormStatus::Published {
            return Ok(());
        }
        if candidate.is_empty() {
            return Err(AgencyError::Validation(
                "A published form needs at least one question".to_string(),
            ));
        }
        FormLogic::new(candidate).validate()
    }

    pub async fn list(
        &self,
        ctx: &TenantContext,
        status: Option<FormStatus>,
        page: &Pagination,
    ) -> Result<Vec<Form>> {
        let mut query = Query::new().eq("agency_id", ctx.agency_id());
        if let Some(status) = status {
            query = query.eq("status", status.to_string());
        }
        let query = query
            .order_by("updated_at", false)
            .limit(page.limit())
            .offset(page.offset());
        self.store.select_as(tables::FORMS, &query).await
    }

    pub async fn get(&self, ctx: &TenantContext, id: &str) -> Result<FormWithQuestions> {
        let form = self.load_form(ctx, id).await?;
        let questions = self.questions_of(&form.id).await?;
        Ok(FormWithQuestions { form, questions })
    }

    pub async fn create(&self, ctx: &TenantContext, req: FormCreate) -> Result<Form> {
        ctx.require_edit()?;
        let title = required_text("Title", &req.title, MAX_TITLE_LEN)?;
        let settings = req.settings.unwrap_or_default();
        validate_settings(&settings)?;
        self.subscriptions
            .ensure_within(&ctx.agency, LimitedResource::Forms)
            .await?;

        let now = Utc::now();
        let form = Form {
            id: new_id(),
            agency_id: ctx.agency_id().to_string(),
            created_by: ctx.user_id().to_string(),
            title,
            description: clean(req.description),
            status: FormStatus::Draft,
            slug: None,
            settings,
            created_at: now,
            updated_at: now,
            published_at: None,
        };
        let form: Form = self.store.insert_as(tables::FORMS, &form).await?;

        self.audit
            .record(
                ctx.agency_id(),
                Some(ctx.user_id()),
                AuditAction::Created,
                "form",
                Some(&form.id),
                json!({ "title": form.title }),
            )
            .await;
        Ok(form)
    }

    /// Publishing goes through [`FormService::publish`]; this only drafts or archives
    pub async fn update(&self, ctx: &TenantContext, id: &str, req: FormUpdate) -> Result<Form> {
        ctx.require_edit()?;
        let form = self.load_form(ctx, id).await?;

        let mut patch = Map::new();
        if let Some(title) = req.title {
            let title = required_text("Title", &title, MAX_TITLE_LEN)?;
            patch.insert("title".to_string(), Value::String(title));
        }
        if req.description.is_some() {
            patch.insert(
                "description".to_string(),
                serde_json::to_value(clean(req.description))?,
            );
        }
        if let Some(settings) = req.settings {
            validate_settings(&settings)?;
            patch.insert("settings".to_string(), serde_json::to_value(settings)?);
        }
        if let Some(status) = req.status {
            if status == FormStatus::Published && form.status != FormStatus::Published {
                return Err(AgencyError::Validation(
                    "Use the publish endpoint to publish a form".to_string(),
                ));
            }
            patch.insert("status".to_string(), serde_json::to_value(status)?);
        }
        if patch.is_empty() {
            return Ok(form);
        }
        let fields: Vec<String> = patch.keys().cloned().collect();
        patch.insert("updated_at".to_string(), serde_json::to_value(Utc::now())?);

        let updated: Form = self
            .store
            .update_as(tables::FORMS, id, &Value::Object(patch))
            .await?
            .ok_or_else(|| AgencyError::not_found("Form", id))?;

        self.audit
            .record(
                ctx.agency_id(),
                Some(ctx.user_id()),
                AuditAction::Updated,
                "form",
                Some(id),
                json!({ "fields": fields, "status": updated.status }),
            )
            .await;
        Ok(updated)
    }

    /// Removes the form and its questions; responses and leads stay
    pub async fn delete(&self, ctx: &TenantContext, id: &str) -> Result<()> {
        ctx.require_edit()?;
        let form = self.load_form(ctx, id).await?;
        let questions = self.questions_of(id).await?;

        let mut tx = Transaction::begin(self.store.clone(), "delete_form");
        let result: Result<()> = async {
            for question in &questions {
                tx.delete(tables::QUESTIONS, &question.id).await?;
            }
            tx.delete(tables::FORMS, id).await?;
            Ok(())
        }
        .await;
        tx.finish(result).await?;

        self.audit
            .record(
                ctx.agency_id(),
                Some(ctx.user_id()),
                AuditAction::Deleted,
                "form",
                Some(id),
                json!({ "title": form.title, "questions": questions.len() }),
            )
            .await;
        Ok(())
    }

    /// Draft copy with fresh ids; jumps point at the copied questions
    pub async fn duplicate(&self, ctx: &TenantContext, id: &str) -> Result<FormWithQuestions> {
        ctx.require_edit()?;
        let source = self.get(ctx, id).await?;
        self.subscriptions
            .ensure_within(&ctx.agency, LimitedResource::Forms)
            .await?;

        let now = Utc::now();
        let form = Form {
            id: new_id(),
            agency_id: ctx.agency_id().to_string(),
            created_by: ctx.user_id().to_string(),
            title: format!("{} (copy)", source.form.title),
            description: source.form.description.clone(),
            status: FormStatus::Draft,
            slug: None,
            settings: source.form.settings.clone(),
            created_at: now,
            updated_at: now,
            published_at: None,
        };

        let ids: HashMap<String, String> = source
            .questions
            .iter()
            .map(|q| (q.id.clone(), new_id()))
            .collect();
        let questions: Vec<Question> = source
            .questions
            .iter()
            .map(|q| {
                let mut copy = q.clone();
                copy.id = ids[&q.id].clone();
                copy.form_id = form.id.clone();
                for rule in &mut copy.logic {
                    if let LogicAction::GoTo { question_id } = &mut rule.action {
                        if let Some(mapped) = ids.get(question_id.as_str()) {
                            *question_id = mapped.clone();
                        }
                    }
                }
                copy
            })
            .collect();

        let mut tx = Transaction::begin(self.store.clone(), "duplicate_form");
        let result: Result<FormWithQuestions> = async {
            let form: Form = tx.insert_as(tables::FORMS, &form).await?;
            let mut copied = Vec::with_capacity(questions.len());
            for question in &questions {
                copied.push(tx.insert_as(tables::QUESTIONS, question).await?);
            }
            Ok(FormWithQuestions {
                form,
                questions: copied,
            })
        }
        .await;
        let copy = tx.finish(result).await?;

        self.audit
            .record(
                ctx.agency_id(),
                Some(ctx.user_id()),
                AuditAction::Created,
                "form",
                Some(&copy.form.id),
                json!({ "duplicated_from": id }),
            )
            .await;
        Ok(copy)
    }

    async fn unique_slug(&self, title: &str) -> Result<String> {
        let base = slugify(title);
        for _ in 0..SLUG_ATTEMPTS {
            let slug = format!("{}-{}", base, slug_suffix());
            let taken = self
                .store
                .count(tables::FORMS, &Query::new().eq("slug", slug.as_str()))
                .await?;
            if taken == 0 {
                return Ok(slug);
            }
            debug!("Slug {} already taken, retrying", slug);
        }
        Err(AgencyError::Conflict(format!(
            "Could not allocate a unique slug for '{}'",
            title
        )))
    }

    pub async fn publish(&self, ctx: &TenantContext, id: &str) -> Result<Form> {
        ctx.require_edit()?;
        let form = self.load_form(ctx, id).await?;
        if form.status == FormStatus::Published {
            return Ok(form);
        }

        let questions = self.questions_of(id).await?;
        if questions.is_empty() {
            return Err(AgencyError::Validation(
                "Add at least one question before publishing".to_string(),
            ));
        }
        let logic = FormLogic::new(&questions);
        logic.validate()?;
        logic.visible_path(&HashMap::new())?;

        let slug = match form.slug {
            Some(slug) => slug,
            None => self.unique_slug(&form.title).await?,
        };
        let now = Utc::now();
        let patch = json!({
            "status": FormStatus::Published,
            "slug": slug,
            "published_at": now,
            "updated_at": now,
        });
        let published: Form = self
            .store
            .update_as(tables::FORMS, id, &patch)
            .await?
            .ok_or_else(|| AgencyError::not_found("Form", id))?;

        info!("Form {} published as /{}", id, slug);
        self.audit
            .record(
                ctx.agency_id(),
                Some(ctx.user_id()),
                AuditAction::Published,
                "form",
                Some(id),
                json!({ "slug": slug, "questions": questions.len() }),
            )
            .await;
        Ok(published)
    }

    pub async fn unpublish(&self, ctx: &TenantContext, id: &str) -> Result<Form> {
        ctx.require_edit()?;
        let form = self.load_form(ctx, id).await?;
        if form.status != FormStatus::Published {
            return Ok(form);
        }

        let patch = json!({ "status": FormStatus::Draft, "updated_at": Utc::now() });
        let draft: Form = self
            .store
            .update_as(tables::FORMS, id, &patch)
            .await?
            .ok_or_else(|| AgencyError::not_found("Form", id))?;

        self.audit
            .record(
                ctx.agency_id(),
                Some(ctx.user_id()),
                AuditAction::Unpublished,
                "form",
                Some(id),
                Value::Null,
            )
            .await;
        Ok(draft)
    }

    pub async fn list_questions(&self, ctx: &TenantContext, form_id: &str) -> Result<Vec<Question>> {
        let form = self.load_form(ctx, form_id).await?;
        self.questions_of(&form.id).await
    }

    /// Appended after the current last question
    pub async fn add_question(
        &self,
        ctx: &TenantContext,
        form_id: &str,
        req: QuestionCreate,
    ) -> Result<Question> {
        ctx.require_edit()?;
        let form = self.load_form(ctx, form_id).await?;
        let mut existing = self.questions_of(form_id).await?;

        let question = Question {
            id: new_id(),
            form_id: form_id.to_string(),
            position: existing.last().map_or(1, |q| q.position + 1),
            question_type: req.question_type,
            title: required_text("Question title", &req.title, MAX_QUESTION_TITLE_LEN)?,
            description: clean(req.description),
            required: req.required,
            options: req.options,
            logic: req.logic,
            scoring: req.scoring,
            settings: req.settings,
        };
        validate_question_shape(&question)?;

        existing.push(question.clone());
        Self::check_live_form(&form, &existing)?;

        let question: Question = self.store.insert_as(tables::QUESTIONS, &question).await?;
        self.touch(form_id).await?;
        Ok(question)
    }

    async fn load_question(&self, form_id: &str, question_id: &str) -> Result<Question> {
        self.store
            .get_as::<Question>(tables::QUESTIONS, question_id)
            .await?
            .filter(|q| q.form_id == form_id)
            .ok_or_else(|| AgencyError::not_found("Question", question_id))
    }

    pub async fn update_question(
        &self,
        ctx: &TenantContext,
        form_id: &str,
        question_id: &str,
        req: QuestionUpdate,
    ) -> Result<Question> {
        ctx.require_edit()?;
        let form = self.load_form(ctx, form_id).await?;
        let mut question = self.load_question(form_id, question_id).await?;

        if let Some(question_type) = req.question_type {
            question.question_type = question_type;
        }
        if let Some(title) = req.title {
            question.title = required_text("Question title", &title, MAX_QUESTION_TITLE_LEN)?;
        }
        if req.description.is_some() {
            question.description = clean(req.description);
        }
        if let Some(required) = req.required {
            question.required = required;
        }
        if let Some(options) = req.options {
            question.options = options;
        }
        if let Some(logic) = req.logic {
            question.logic = logic;
        }
        if req.scoring.is_some() {
            question.scoring = req.scoring;
        }
        if let Some(settings) = req.settings {
            question.settings = settings;
        }
        validate_question_shape(&question)?;

        let candidate: Vec<Question> = self
            .questions_of(form_id)
            .await?
            .into_iter()
            .map(|q| if q.id == question.id { question.clone() } else { q })
            .collect();
        Self::check_live_form(&form, &candidate)?;

        let updated: Question = self
            .store
            .update_as(tables::QUESTIONS, question_id, &question)
            .await?
            .ok_or_else(|| AgencyError::not_found("Question", question_id))?;
        self.touch(form_id).await?;
        Ok(updated)
    }

    /// Refused while another question's logic jumps to it
    pub async fn delete_question(
        &self,
        ctx: &TenantContext,
        form_id: &str,
        question_id: &str,
    ) -> Result<()> {
        ctx.require_edit()?;
        let form = self.load_form(ctx, form_id).await?;
        let question = self.load_question(form_id, question_id).await?;
        let questions = self.questions_of(form_id).await?;

        let referenced_by: Vec<&str> = questions
            .iter()
            .filter(|q| q.id != question.id)
            .filter(|q| {
                q.logic.iter().any(|rule| {
                    matches!(&rule.action, LogicAction::GoTo { question_id }
                        if question_id == &question.id)
                })
            })
            .map(|q| q.title.as_str())
            .collect();
        if !referenced_by.is_empty() {
            return Err(AgencyError::Conflict(format!(
                "'{}' is the target of logic in: {}",
                question.title,
                referenced_by.join(", ")
            )));
        }

        let remaining: Vec<Question> = questions
            .iter()
            .filter(|q| q.id != question.id)
            .cloned()
            .collect();
        Self::check_live_form(&form, &remaining)?;

        self.store.delete(tables::QUESTIONS, question_id).await?;
        self.touch(form_id).await?;
        Ok(())
    }

    /// `order` must name every question of the form exactly once
    pub async fn reorder_questions(
        &self,
        ctx: &TenantContext,
        form_id: &str,
        order: QuestionOrder,
    ) -> Result<Vec<Question>> {
        ctx.require_edit()?;
        let form = self.load_form(ctx, form_id).await?;
        let questions = self.questions_of(form_id).await?;

        let known: HashSet<&str> = questions.iter().map(|q| q.id.as_str()).collect();
        let requested: HashSet<&str> = order.question_ids.iter().map(String::as_str).collect();
        if requested.len() != order.question_ids.len() || requested != known {
            return Err(AgencyError::Validation(
                "question_ids must list every question of the form exactly once".to_string(),
            ));
        }

        let positions: HashMap<&str, i32> = order
            .question_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i as i32 + 1))
            .collect();
        let candidate: Vec<Question> = questions
            .iter()
            .cloned()
            .map(|mut q| {
                q.position = positions[q.id.as_str()];
                q
            })
            .collect();
        Self::check_live_form(&form, &candidate)?;

        let mut tx = Transaction::begin(self.store.clone(), "reorder_questions");
        let result: Result<()> = async {
            for (before, after) in questions.iter().zip(&candidate) {
                if before.position != after.position {
                    tx.update(
                        tables::QUESTIONS,
                        &after.id,
                        json!({ "position": after.position }),
                    )
                    .await?;
                }
            }
            Ok(())
        }
        .await;
        tx.finish(result).await?;
        self.touch(form_id).await?;

        Ok(position_sorted(candidate))
    }

    pub async fn list_responses(
        &self,
        ctx: &TenantContext,
        form_id: &str,
        page: &Pagination,
    ) -> Result<Vec<FormResponse>> {
        let form = self.load_form(ctx, form_id).await?;
        let query = Query::new()
            .eq("form_id", form.id.as_str())
            .order_by("submitted_at", false)
            .limit(page.limit())
            .offset(page.offset());
        self.store.select_as(tables::RESPONSES, &query).await
    }

    pub async fn analytics(&self, ctx: &TenantContext, form_id: &str) -> Result<FormAnalytics> {
        let form = self.load_form(ctx, form_id).await?;
        let by_form = Query::new().eq("form_id", form.id.as_str());

        let total_responses = self.store.count(tables::RESPONSES, &by_form).await?;
        let since = timestamp_cutoff(Utc::now() - Duration::days(30));
        let responses_last_30_days = self
            .store
            .count(tables::RESPONSES, &by_form.clone().gte("submitted_at", since))
            .await?;

        let scored: Vec<FormResponse> = self
            .store
            .select_as(tables::RESPONSES, &by_form.clone().neq("lead_score", Value::Null))
            .await?;
        let scores: Vec<u32> = scored.iter().filter_map(|r| r.lead_score).collect();
        let average_score = (!scores.is_empty())
            .then(|| scores.iter().map(|&s| f64::from(s)).sum::<f64>() / scores.len() as f64);

        let mut analytics = FormAnalytics {
            form_id: form.id.clone(),
            total_responses,
            responses_last_30_days,
            average_score,
            ..Default::default()
        };
        for qualification in [
            LeadQualification::Hot,
            LeadQualification::Warm,
            LeadQualification::Cold,
        ] {
            let query = by_form
                .clone()
                .eq("qualification", qualification.to_string());
            let count = self.store.count(tables::LEADS, &query).await?;
            match qualification {
                LeadQualification::Hot => analytics.hot_leads = count,
                LeadQualification::Warm => analytics.warm_leads = count,
                LeadQualification::Cold => analytics.cold_leads = count,
            }
        }
        Ok(analytics)
    }

    async fn published_by_slug(&self, slug: &str) -> Result<Form> {
        let query = Query::new()
            .eq("slug", slug)
            .eq("status", FormStatus::Published.to_string());
        self.store
            .first_as(tables::FORMS, &query)
            .await?
            .ok_or_else(|| AgencyError::not_found("Form", slug))
    }

    /// Published form as respondents see it
    pub async fn get_public(&self, slug: &str) -> Result<FormWithQuestions> {
        let form = self.published_by_slug(slug).await?;
        let questions = self.questions_of(&form.id).await?;
        Ok(public_view(FormWithQuestions { form, questions }))
    }

    /// Blank `current_question_id` asks for the first question
    pub async fn next_step(&self, slug: &str, req: NextStepRequest) -> Result<NextStep> {
        let form = self.published_by_slug(slug).await?;
        let questions = self.questions_of(&form.id).await?;
        let logic = FormLogic::new(&questions);

        if req.current_question_id.trim().is_empty() {
            return Ok(match logic.first() {
                Some(first) => NextStep::Question {
                    question_id: first.id.clone(),
                },
                None => NextStep::End,
            });
        }
        logic.next_step(&req.current_question_id, &answer_map(&req.answers))
    }

    pub async fn submit(&self, slug: &str, req: ResponseSubmission) -> Result<Submitted> {
        let form = self.published_by_slug(slug).await?;
        let agency = self.subscriptions.load_agency(&form.agency_id).await?;
        self.subscriptions
            .ensure_within(&agency, LimitedResource::ResponsesPerMonth)
            .await?;

        let questions = self.questions_of(&form.id).await?;
        let answers = FormLogic::new(&questions).validate_answers(&req.answers)?;
        let respondent = Respondent::from_answers(&questions, &answers);

        let email = match clean(req.respondent_email) {
            Some(email) if is_valid_email(&email) => Some(email.to_lowercase()),
            Some(email) => {
                return Err(AgencyError::Validation(format!(
                    "'{}' is not a valid email address",
                    email
                )))
            }
            None => respondent.email.clone().map(|e| e.to_lowercase()),
        };

        let has_scoring = questions.iter().any(|q| q.scoring.is_some());
        let score = self.scorer.score(&questions, &answers);
        let now = Utc::now();
        let response = FormResponse {
            id: new_id(),
            form_id: form.id.clone(),
            agency_id: form.agency_id.clone(),
            answers,
            respondent_email: email.clone(),
            lead_score: has_scoring.then_some(score.score),
            lead_id: None,
            submitted_at: now,
        };

        let mut tx = Transaction::begin(self.store.clone(), "form_submission");
        let result: Result<(FormResponse, Option<Lead>)> = async {
            let mut response: FormResponse = tx.insert_as(tables::RESPONSES, &response).await?;
            let Some(email) = email.filter(|_| form.settings.create_leads) else {
                return Ok((response, None));
            };

            let (first_name, last_name) = respondent.split_name();
            let contact = ContactInput {
                first_name,
                last_name,
                email: Some(email.clone()),
                phone: respondent.phone.clone(),
                ..Default::default()
            };
            self.contacts
                .upsert_by_email(&mut tx, &agency, contact)
                .await?;

            let lead = Lead {
                id: new_id(),
                agency_id: agency.id.clone(),
                form_id: Some(form.id.clone()),
                response_id: Some(response.id.clone()),
                name: respondent.name.clone(),
                email: Some(email),
                phone: respondent.phone.clone(),
                score: score.score,
                qualification: score.qualification,
                status: LeadStatus::New,
                source: format!("form:{}", form.title),
                notes: None,
                created_at: now,
                updated_at: now,
            };
            let lead: Lead = tx.insert_as(tables::LEADS, &lead).await?;
            tx.update(tables::RESPONSES, &response.id, json!({ "lead_id": lead.id }))
                .await?;
            response.lead_id = Some(lead.id.clone());
            Ok((response, Some(lead)))
        }
        .await;
        let (response, lead) = tx.finish(result).await?;

        info!(
            "Form {} received response {} (score {}, lead {:?})",
            form.id,
            response.id,
            score.score,
            response.lead_id
        );
        self.audit
            .record(
                &agency.id,
                None,
                AuditAction::Submitted,
                "form_response",
                Some(&response.id),
                json!({
                    "form_id": form.id,
                    "lead_id": response.lead_id,
                    "qualification": lead.as_ref().map(|l| l.qualification),
                }),
            )
            .await;

        Ok(Submitted {
            agency_id: agency.id,
            receipt: SubmissionReceipt {
                response_id: response.id,
                lead_id: response.lead_id,
                lead_score: response.lead_score,
                thank_you_message: form.settings.thank_you_message,
                redirect_url: form.settings.redirect_url,
            },
        })
    }
}
