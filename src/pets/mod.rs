//! Pet records that chat requests are about.

use axum::{debug_handler, extract::{Path, Query, State}, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::Identity, db, AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_pets).post(new_pet))
        .route("/{id}", get(pet))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PetStatus {
    Lost,
    Found,
    Adoption,
}

impl PetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PetStatus::Lost => "lost",
            PetStatus::Found => "found",
            PetStatus::Adoption => "adoption",
        }
    }

    fn parse(raw: &str) -> AppResult<PetStatus> {
        match raw {
            "lost" => Ok(PetStatus::Lost),
            "found" => Ok(PetStatus::Found),
            "adoption" => Ok(PetStatus::Adoption),
            other => Err(anyhow::anyhow!("unknown pet status {other:?}").into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pet {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub species: String,
    pub status: PetStatus,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

type PetRow = (String, String, String, String, String, String, i64);

const COLUMNS: &str = "id,owner_id,name,species,status,description,created_at";

impl Pet {
    fn from_row((id, owner_id, name, species, status, description, created_at): PetRow) -> AppResult<Pet> {
        Ok(Pet {
            id: db::parse_id(&id)?,
            owner_id: db::parse_id(&owner_id)?,
            name,
            species,
            status: PetStatus::parse(&status)?,
            description,
            created_at: db::from_ms(created_at),
        })
    }
}

pub async fn find_pet(db_pool: &SqlitePool, id: Uuid) -> AppResult<Option<Pet>> {
    let row: Option<PetRow> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM pets WHERE id=?"))
        .bind(id.to_string())
        .fetch_optional(db_pool)
        .await?;
    row.map(Pet::from_row).transpose()
}

#[derive(Debug, Deserialize)]
pub(crate) struct NewPetBody {
    name: String,
    species: String,
    status: PetStatus,
    #[serde(default)]
    description: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_pet(
    State(db_pool): State<SqlitePool>,
    identity: Identity,
    Json(NewPetBody { name, species, status, description }): Json<NewPetBody>,
) -> AppResult<(StatusCode, Json<Pet>)> {
    let name = name.trim();
    let species = species.trim();
    if name.is_empty() || species.is_empty() {
        return Err(AppError::Validation("pet name and species are required".to_owned()));
    }

    let created_at = db::now_ms();
    let pet = Pet {
        id: Uuid::now_v7(),
        owner_id: identity.id(),
        name: name.to_owned(),
        species: species.to_owned(),
        status,
        description,
        created_at: db::from_ms(created_at),
    };

    sqlx::query("INSERT INTO pets (id,owner_id,name,species,status,description,created_at) VALUES (?,?,?,?,?,?,?)")
        .bind(pet.id.to_string())
        .bind(pet.owner_id.to_string())
        .bind(&pet.name)
        .bind(&pet.species)
        .bind(pet.status.as_str())
        .bind(&pet.description)
        .bind(created_at)
        .execute(&db_pool)
        .await?;

    tracing::info!(pet_id = %pet.id, owner_id = %pet.owner_id, status = pet.status.as_str(), "pet registered");
    Ok((StatusCode::CREATED, Json(pet)))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListPetsQuery {
    status: Option<PetStatus>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn list_pets(
    State(db_pool): State<SqlitePool>,
    Query(ListPetsQuery { status }): Query<ListPetsQuery>,
) -> AppResult<Json<Vec<Pet>>> {
    let rows: Vec<PetRow> = match status {
        Some(status) => sqlx::query_as(&format!("SELECT {COLUMNS} FROM pets WHERE status=? ORDER BY created_at DESC"))
            .bind(status.as_str())
            .fetch_all(&db_pool)
            .await?,
        None => sqlx::query_as(&format!("SELECT {COLUMNS} FROM pets ORDER BY created_at DESC"))
            .fetch_all(&db_pool)
            .await?,
    };

    Ok(Json(rows.into_iter().map(Pet::from_row).collect::<AppResult<_>>()?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn pet(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Pet>> {
    find_pet(&db_pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("pet".to_owned()))
}
