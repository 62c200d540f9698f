//! Built-in template catalog

use crate::catalog::{TemplateEntry, TemplateProvider};
use text2iac_common::ArtifactKind;

fn entry(
    name: &str,
    kind: ArtifactKind,
    provider: TemplateProvider,
    tags: &[&str],
    filename: &str,
    body: &str,
) -> TemplateEntry {
    TemplateEntry {
        name: name.to_string(),
        kind,
        provider,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        filename: filename.to_string(),
        body: body.to_string(),
        requires: Vec::new(),
    }
}

const NETWORK_TAGS: &[&str] = &["basic-infrastructure", "network", "networking", "vpc"];
const DATABASE_TAGS: &[&str] = &["database", "postgres", "postgresql", "rds", "sql"];
const CACHE_TAGS: &[&str] = &["cache", "redis", "elasticache"];
const STORAGE_TAGS: &[&str] = &["storage", "s3", "bucket", "object-storage", "files"];
const SERVICE_TAGS: &[&str] = &[
    "api", "backend", "web", "webapp", "service", "container", "compute", "nodejs", "node",
];

pub fn builtin_templates() -> Vec<TemplateEntry> {
    use ArtifactKind::*;
    use TemplateProvider as P;

    vec![
        // AWS
        entry("aws-network", Terraform, P::Aws, NETWORK_TAGS, "main.tf", AWS_NETWORK),
        entry("aws-postgres", Terraform, P::Aws, DATABASE_TAGS, "database.tf", AWS_POSTGRES)
            .requiring(&["aws-network"]),
        entry("aws-redis", Terraform, P::Aws, CACHE_TAGS, "cache.tf", AWS_REDIS)
            .requiring(&["aws-network"]),
        entry("aws-s3", Terraform, P::Aws, STORAGE_TAGS, "storage.tf", AWS_S3)
            .requiring(&["aws-network"]),
        entry("aws-ecs-service", Terraform, P::Aws, SERVICE_TAGS, "service.tf", AWS_ECS)
            .requiring(&["aws-network"]),
        // Azure
        entry("azure-network", Terraform, P::Azure, NETWORK_TAGS, "main.tf", AZURE_NETWORK),
        entry("azure-postgres", Terraform, P::Azure, DATABASE_TAGS, "database.tf", AZURE_POSTGRES)
            .requiring(&["azure-network"]),
        // GCP
        entry("gcp-network", Terraform, P::Gcp, NETWORK_TAGS, "main.tf", GCP_NETWORK),
        entry("gcp-postgres", Terraform, P::Gcp, DATABASE_TAGS, "database.tf", GCP_POSTGRES)
            .requiring(&["gcp-network"]),
        // Provider independent
        entry(
            "k8s-app",
            Kubernetes,
            P::Any,
            &["api", "backend", "web", "webapp", "service", "kubernetes", "k8s", "nodejs", "node"],
            "app.yaml",
            K8S_APP,
        ),
        entry("compose-app", DockerCompose, P::Any, SERVICE_TAGS, "docker-compose.yml", COMPOSE_APP),
        entry(
            "compose-postgres",
            DockerCompose,
            P::Any,
            DATABASE_TAGS,
            "docker-compose.database.yml",
            COMPOSE_POSTGRES,
        )
        .requiring(&["compose-app"]),
        entry(
            "compose-redis",
            DockerCompose,
            P::Any,
            CACHE_TAGS,
            "docker-compose.cache.yml",
            COMPOSE_REDIS,
        )
        .requiring(&["compose-app"]),
        entry(
            "prometheus",
            Monitoring,
            P::Any,
            &["monitoring", "prometheus", "metrics", "observability", "alerting"],
            "prometheus.yml",
            PROMETHEUS,
        ),
        entry(
            "github-actions",
            Ci,
            P::Any,
            &["ci", "cicd", "ci-cd", "pipeline", "github-actions"],
            "deploy.yml",
            GITHUB_ACTIONS,
        ),
    ]
}

const AWS_NETWORK: &str = r#"terraform {
  required_providers {
    aws = {
      source  = "hashicorp/aws"
      version = "~> 5.0"
    }
  }
}

provider "aws" {
  region = "{{region}}"
}

locals {
  name = "{{project_name}}-{{environment}}"
  tags = {
    Project     = "{{project_name}}"
    Environment = "{{environment}}"
    ManagedBy   = "text2iac"
  }
}

resource "aws_vpc" "main" {
  cidr_block           = "10.0.0.0/16"
  enable_dns_hostnames = true
  tags                 = merge(local.tags, { Name = local.name })
}

resource "aws_subnet" "private" {
  count             = 2
  vpc_id            = aws_vpc.main.id
  cidr_block        = cidrsubnet(aws_vpc.main.cidr_block, 8, count.index)
  availability_zone = data.aws_availability_zones.available.names[count.index]
  tags              = merge(local.tags, { Name = "${local.name}-private-${count.index}" })
}

data "aws_availability_zones" "available" {
  state = "available"
}
"#;

const AWS_POSTGRES: &str = r#"resource "aws_db_subnet_group" "main" {
  name       = "{{project_name}}-{{environment}}"
  subnet_ids = aws_subnet.private[*].id
}

resource "aws_db_instance" "postgres" {
  identifier           = "{{project_name}}-{{environment}}-db"
  engine               = "postgres"
  engine_version       = "16"
  instance_class       = "db.t3.micro"
  allocated_storage    = 20
  db_name              = "app"
  username             = "app"
  manage_master_user_password = true
  db_subnet_group_name = aws_db_subnet_group.main.name
  skip_final_snapshot  = true
}
"#;

const AWS_REDIS: &str = r#"resource "aws_elasticache_subnet_group" "main" {
  name       = "{{project_name}}-{{environment}}-cache"
  subnet_ids = aws_subnet.private[*].id
}

resource "aws_elasticache_cluster" "redis" {
  cluster_id        = "{{project_name}}-{{environment}}"
  engine            = "redis"
  node_type         = "cache.t3.micro"
  num_cache_nodes   = 1
  subnet_group_name = aws_elasticache_subnet_group.main.name
}
"#;

const AWS_S3: &str = r#"resource "aws_s3_bucket" "assets" {
  bucket = "{{project_name}}-{{environment}}-assets"
}

resource "aws_s3_bucket_public_access_block" "assets" {
  bucket                  = aws_s3_bucket.assets.id
  block_public_acls       = true
  block_public_policy     = true
  ignore_public_acls      = true
  restrict_public_buckets = true
}
"#;

const AWS_ECS: &str = r#"resource "aws_ecs_cluster" "main" {
  name = "{{project_name}}-{{environment}}"
}

resource "aws_ecs_task_definition" "app" {
  family                   = "{{project_name}}"
  requires_compatibilities = ["FARGATE"]
  network_mode             = "awsvpc"
  cpu                      = 256
  memory                   = 512
  container_definitions = jsonencode([{
    name         = "{{project_name}}"
    image        = "{{project_name}}:latest"
    essential    = true
    portMappings = [{ containerPort = 3000 }]
  }])
}

resource "aws_ecs_service" "app" {
  name            = "{{project_name}}"
  cluster         = aws_ecs_cluster.main.id
  task_definition = aws_ecs_task_definition.app.arn
  desired_count   = 1
  launch_type     = "FARGATE"

  network_configuration {
    subnets = aws_subnet.private[*].id
  }
}
"#;

const AZURE_NETWORK: &str = r#"terraform {
  required_providers {
    azurerm = {
      source  = "hashicorp/azurerm"
      version = "~> 3.0"
    }
  }
}

provider "azurerm" {
  features {}
}

resource "azurerm_resource_group" "main" {
  name     = "{{project_name}}-{{environment}}"
  location = "{{region}}"
}

resource "azurerm_virtual_network" "main" {
  name                = "{{project_name}}-{{environment}}-vnet"
  address_space       = ["10.0.0.0/16"]
  location            = azurerm_resource_group.main.location
  resource_group_name = azurerm_resource_group.main.name
}
"#;

const AZURE_POSTGRES: &str = r#"resource "azurerm_postgresql_flexible_server" "main" {
  name                = "{{project_name}}-{{environment}}-db"
  resource_group_name = azurerm_resource_group.main.name
  location            = azurerm_resource_group.main.location
  version             = "16"
  sku_name            = "B_Standard_B1ms"
  storage_mb          = 32768
}
"#;

const GCP_NETWORK: &str = r#"terraform {
  required_providers {
    google = {
      source  = "hashicorp/google"
      version = "~> 5.0"
    }
  }
}

provider "google" {
  region = "{{region}}"
}

resource "google_compute_network" "main" {
  name                    = "{{project_name}}-{{environment}}"
  auto_create_subnetworks = false
}

resource "google_compute_subnetwork" "private" {
  name          = "{{project_name}}-{{environment}}-private"
  ip_cidr_range = "10.0.0.0/20"
  network       = google_compute_network.main.id
}
"#;

const GCP_POSTGRES: &str = r#"resource "google_sql_database_instance" "main" {
  name             = "{{project_name}}-{{environment}}-db"
  database_version = "POSTGRES_16"

  settings {
    tier = "db-f1-micro"
  }

  deletion_protection = false
}
"#;

const K8S_APP: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{project_name}}
  labels:
    app: {{project_name}}
    environment: {{environment}}
spec:
  replicas: 2
  selector:
    matchLabels:
      app: {{project_name}}
  template:
    metadata:
      labels:
        app: {{project_name}}
    spec:
      containers:
        - name: {{project_name}}
          image: {{project_name}}:latest
          ports:
            - containerPort: 3000
          resources:
            requests:
              cpu: 100m
              memory: 128Mi
---
apiVersion: v1
kind: Service
metadata:
  name: {{project_name}}
spec:
  selector:
    app: {{project_name}}
  ports:
    - port: 80
      targetPort: 3000
"#;

const COMPOSE_APP: &str = r#"services:
  app:
    build: .
    image: {{project_name}}:latest
    ports:
      - "3000:3000"
    environment:
      NODE_ENV: {{environment}}
    restart: unless-stopped
"#;

const COMPOSE_POSTGRES: &str = r#"services:
  db:
    image: postgres:16
    environment:
      POSTGRES_DB: {{project_name}}
      POSTGRES_USER: app
      POSTGRES_PASSWORD: change-me
    volumes:
      - db-data:/var/lib/postgresql/data
  app:
    depends_on:
      - db
    environment:
      DATABASE_URL: postgres://app:change-me@db:5432/{{project_name}}

volumes:
  db-data:
"#;

const COMPOSE_REDIS: &str = r#"services:
  cache:
    image: redis:7
  app:
    depends_on:
      - cache
    environment:
      REDIS_URL: redis://cache:6379
"#;

const PROMETHEUS: &str = r#"global:
  scrape_interval: 15s
  external_labels:
    project: {{project_name}}
    environment: {{environment}}

scrape_configs:
  - job_name: {{project_name}}
    static_configs:
      - targets: ["app:3000"]
"#;

const GITHUB_ACTIONS: &str = r#"name: deploy-{{project_name}}

on:
  push:
    branches: [main]

jobs:
  terraform:
    runs-on: ubuntu-latest
    environment: {{environment}}
    steps:
      - uses: actions/checkout@v4
      - uses: hashicorp/setup-terraform@v3
      - run: terraform init -input=false
        working-directory: terraform
      - run: terraform plan -input=false
        working-directory: terraform
"#;
