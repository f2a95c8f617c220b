use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use config::AppConfig;
use core_types::{
    AntibodyRole, AppRole, NewAntibody, NewExperiment, NewMember, NewSlide, NewTreatmentGroup,
    NewUser, Session,
};
use notebook::Notebook;
use serde::Serialize;

use crate::landing::LandingForm;
use crate::{
    AntibodyCommands, Commands, ExperimentCommands, GroupCommands, MemberCommands, NoteCommands,
    SessionArgs, SlideCommands, UserCommands,
};

pub struct App {
    pub notebook: Notebook,
    pub config: AppConfig,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render output")?
    );
    Ok(())
}

impl App {
    fn session(&self, args: &SessionArgs) -> Result<Session> {
        let mut form = LandingForm::new(self.config.default_mode);
        if let Some(mode) = args.mode {
            form.select(mode);
        }
        let request = form
            .user(&args.user)
            .output_dir(args.output_dir.clone())
            .submit()?;
        Ok(self.notebook.begin_session(&request)?)
    }

    pub fn dispatch(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Init => {
                println!("config:   {}", self.config_path.display());
                println!("database: {}", self.db_path.display());
                print_json(&self.notebook.list_users()?)
            }
            Commands::Users { command, session } => self.users(command, &self.session(&session)?),
            Commands::Begin { session } => print_json(&self.session(&session)?),
            Commands::Experiments { command, session } => {
                self.experiments(command, &self.session(&session)?)
            }
            Commands::Members { command, session } => {
                self.members(command, &self.session(&session)?)
            }
            Commands::Groups { command, session } => self.groups(command, &self.session(&session)?),
            Commands::Slides { command, session } => self.slides(command, &self.session(&session)?),
            Commands::Antibodies { command, session } => {
                self.antibodies(command, &self.session(&session)?)
            }
            Commands::Notes { command, session } => self.notes(command, &self.session(&session)?),
            Commands::Audit {
                entity,
                id,
                session,
            } => {
                let session = self.session(&session)?;
                match (entity, id) {
                    (Some(entity), Some(id)) => {
                        print_json(&self.notebook.audit_trail(&session, entity, &id)?)
                    }
                    _ => print_json(&self.notebook.my_audit(&session)?),
                }
            }
            Commands::Export {
                experiment,
                session,
            } => {
                let export = self
                    .notebook
                    .export_experiment(&self.session(&session)?, experiment)?;
                println!("{}", export.file_path);
                Ok(())
            }
            Commands::Protocol {
                experiment,
                session,
            } => {
                let text = self
                    .notebook
                    .protocol_text(&self.session(&session)?, experiment)?;
                println!("{text}");
                Ok(())
            }
        }
    }

    fn users(&self, command: UserCommands, session: &Session) -> Result<()> {
        match command {
            UserCommands::Add {
                display_name,
                email,
                admin,
            } => {
                let mut new = NewUser::researcher(display_name);
                if admin {
                    new.app_role = AppRole::Admin;
                }
                new.email = email;
                print_json(&self.notebook.create_user(session, &new)?)
            }
            UserCommands::List => print_json(&self.notebook.list_users()?),
            UserCommands::Remove { id } => print_json(&self.notebook.delete_user(session, id)?),
        }
    }

    fn experiments(&self, command: ExperimentCommands, session: &Session) -> Result<()> {
        match command {
            ExperimentCommands::Create {
                name,
                description,
                experiment_type,
            } => {
                let new = NewExperiment {
                    description,
                    experiment_type,
                    ..NewExperiment::new(session.user_id, name)
                };
                print_json(&self.notebook.create_experiment(session, &new)?)
            }
            ExperimentCommands::List => print_json(&self.notebook.list_experiments(session)?),
            ExperimentCommands::Status { id, status } => {
                print_json(&self.notebook.set_experiment_status(session, id, status)?)
            }
            ExperimentCommands::Delete { id } => {
                print_json(&self.notebook.delete_experiment(session, id)?)
            }
        }
    }

    fn members(&self, command: MemberCommands, session: &Session) -> Result<()> {
        match command {
            MemberCommands::Add {
                experiment,
                member,
                role,
                can_add_notes,
            } => {
                let user = self.notebook.resolve_user(&member)?;
                let new = NewMember {
                    experiment_id: experiment,
                    user_id: user.id,
                    role,
                    can_add_notes,
                };
                print_json(&self.notebook.add_member(session, &new)?)
            }
        }
    }

    fn groups(&self, command: GroupCommands, session: &Session) -> Result<()> {
        match command {
            GroupCommands::Add {
                experiment,
                name,
                description,
                sort_order,
            } => {
                let new = NewTreatmentGroup {
                    experiment_id: experiment,
                    name,
                    description,
                    sort_order,
                };
                print_json(&self.notebook.create_treatment_group(session, &new)?)
            }
        }
    }

    fn slides(&self, command: SlideCommands, session: &Session) -> Result<()> {
        match command {
            SlideCommands::Add {
                experiment,
                group,
                label,
                location,
            } => {
                let new = NewSlide {
                    storage_location: location,
                    ..NewSlide::new(experiment, group, session.user_id, label)
                };
                print_json(&self.notebook.create_slide(session, &new)?)
            }
            SlideCommands::List { experiment } => {
                print_json(&self.notebook.list_slides(session, experiment)?)
            }
            SlideCommands::Status { id, status } => {
                print_json(&self.notebook.set_slide_status(session, id, status)?)
            }
            SlideCommands::Panel { id } => print_json(&self.notebook.check_panel(session, id)?),
        }
    }

    fn antibodies(&self, command: AntibodyCommands, session: &Session) -> Result<()> {
        match command {
            AntibodyCommands::Add {
                name,
                host,
                anti,
                fluorophore,
                stock,
                catalog_number,
                igg,
            } => {
                let base = match (anti, fluorophore) {
                    (Some(anti), Some(fluorophore)) => {
                        NewAntibody::secondary(name, host, anti, fluorophore)
                    }
                    (None, fluorophore) => NewAntibody {
                        fluorophore,
                        ..NewAntibody::primary(name, host)
                    },
                    (Some(_), None) => bail!("a secondary antibody needs --fluorophore"),
                };
                let new = NewAntibody {
                    stock_concentration: stock,
                    catalog_number,
                    igg_subtype: igg,
                    ..base
                };
                print_json(&self.notebook.create_antibody(session, &new)?)
            }
            AntibodyCommands::List { role } => print_json(&self.notebook.list_antibodies(role)?),
            AntibodyCommands::Import { role, path } => {
                let configured = match role {
                    AntibodyRole::Primary => &self.config.panel.primary_catalog,
                    AntibodyRole::Secondary => &self.config.panel.secondary_catalog,
                };
                let Some(path) = path.or_else(|| configured.clone()) else {
                    bail!("no {role} catalog path given or configured");
                };
                let summary = self.notebook.import_antibodies(session, role, &path)?;
                print_json(&summary)
            }
        }
    }

    fn notes(&self, command: NoteCommands, session: &Session) -> Result<()> {
        match command {
            NoteCommands::Add {
                slide,
                body,
                note_type,
            } => print_json(&self.notebook.add_note(session, slide, note_type, &body)?),
            NoteCommands::Feed { slide } => print_json(&self.notebook.note_feed(session, slide)?),
        }
    }
}
